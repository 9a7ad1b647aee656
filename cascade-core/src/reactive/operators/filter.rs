//! Filter, collect and drop.

use std::cell::Cell;

use crate::error::{self, Try};

use super::single::Transform;

/// Emits `f(value)` when it is `Some`. Failures pass through.
pub(crate) struct CollectTransform<A, B> {
    collect: Box<dyn Fn(&A) -> Option<B>>,
}

impl<A: 'static, B: 'static> CollectTransform<A, B> {
    pub(crate) fn new<F>(collect: F) -> Self
    where
        F: Fn(&A) -> Option<B> + 'static,
    {
        Self {
            collect: Box::new(collect),
        }
    }
}

impl<A: 'static, B: 'static> Transform<A, B> for CollectTransform<A, B> {
    fn apply(&self, value: &Try<A>) -> Option<Try<B>> {
        match value {
            Ok(v) => error::catch(|| (self.collect)(v)).transpose(),
            Err(err) => Some(Err(err.clone())),
        }
    }
}

type DropWhile<T> = Box<dyn Fn(&Try<T>, u32) -> bool>;

/// Suppresses values until `drop_while` first returns false, then passes
/// everything through.
///
/// `drop_while` receives each value and the number of values dropped so
/// far. With `reset_on_stop`, dropping starts over on every restart.
pub(crate) struct DropTransform<T> {
    drop_while: DropWhile<T>,
    reset_on_stop: bool,
    dropping: Cell<bool>,
    dropped: Cell<u32>,
}

impl<T: 'static> DropTransform<T> {
    pub(crate) fn new<F>(drop_while: F, reset_on_stop: bool) -> Self
    where
        F: Fn(&Try<T>, u32) -> bool + 'static,
    {
        Self {
            drop_while: Box::new(drop_while),
            reset_on_stop,
            dropping: Cell::new(true),
            dropped: Cell::new(0),
        }
    }
}

impl<T: Clone + 'static> Transform<T, T> for DropTransform<T> {
    fn apply(&self, value: &Try<T>) -> Option<Try<T>> {
        if self.dropping.get() {
            match error::catch(|| (self.drop_while)(value, self.dropped.get())) {
                Ok(true) => {
                    self.dropped.set(self.dropped.get() + 1);
                    return None;
                }
                Ok(false) => self.dropping.set(false),
                Err(err) => {
                    self.dropping.set(false);
                    return Some(Err(err));
                }
            }
        }
        Some(value.clone())
    }

    fn on_stop(&self) {
        if self.reset_on_stop {
            self.dropping.set(true);
            self.dropped.set(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn collect_filters_and_maps() {
        let evens = CollectTransform::new(|x: &i32| (x % 2 == 0).then(|| x * 10));
        assert_eq!(evens.apply(&Ok(1)), None);
        assert_eq!(evens.apply(&Ok(2)), Some(Ok(20)));
        assert_eq!(
            evens.apply(&Err(Error::failed("e"))),
            Some(Err(Error::failed("e")))
        );
    }

    #[test]
    fn drop_counts_then_passes_everything() {
        let drop = DropTransform::new(|_: &Try<i32>, dropped| dropped < 2, false);
        assert_eq!(drop.apply(&Ok(1)), None);
        assert_eq!(drop.apply(&Ok(2)), None);
        assert_eq!(drop.apply(&Ok(3)), Some(Ok(3)));
        assert_eq!(drop.apply(&Ok(4)), Some(Ok(4)));
    }

    #[test]
    fn drop_while_stops_at_first_false() {
        let drop = DropTransform::new(|v: &Try<i32>, _| matches!(v, Ok(x) if *x < 5), true);
        assert_eq!(drop.apply(&Ok(1)), None);
        assert_eq!(drop.apply(&Ok(7)), Some(Ok(7)));
        assert_eq!(drop.apply(&Ok(2)), Some(Ok(2)));

        drop.on_stop();
        assert_eq!(drop.apply(&Ok(2)), None);
    }

    #[test]
    fn without_reset_dropping_stays_done() {
        let drop = DropTransform::new(|_: &Try<i32>, dropped| dropped < 1, false);
        assert_eq!(drop.apply(&Ok(1)), None);
        assert_eq!(drop.apply(&Ok(2)), Some(Ok(2)));
        drop.on_stop();
        assert_eq!(drop.apply(&Ok(3)), Some(Ok(3)));
    }
}
