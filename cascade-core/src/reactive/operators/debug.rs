//! Debug taps.
//!
//! A tap observes values and lifecycle events of the node it wraps without
//! changing them. A panicking hook is reported as [`Error::Debug`] and the
//! value still flows on.

use crate::error::{self, send_unhandled_error, Error, Try};

use super::single::Transform;

type Hook<T> = Box<dyn Fn(&T)>;
type Lifecycle = Box<dyn Fn()>;

/// Callbacks for a debug tap. Unset hooks do nothing.
pub struct DebugHooks<T> {
    on_next: Option<Hook<T>>,
    on_error: Option<Hook<Error>>,
    on_start: Option<Lifecycle>,
    on_stop: Option<Lifecycle>,
}

impl<T> Default for DebugHooks<T> {
    fn default() -> Self {
        Self {
            on_next: None,
            on_error: None,
            on_start: None,
            on_stop: None,
        }
    }
}

impl<T: 'static> DebugHooks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_next(mut self, hook: impl Fn(&T) + 'static) -> Self {
        self.on_next = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&Error) + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_start(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }
}

pub(crate) struct DebugTransform<T> {
    hooks: DebugHooks<T>,
}

impl<T: 'static> DebugTransform<T> {
    pub(crate) fn new(hooks: DebugHooks<T>) -> Self {
        Self { hooks }
    }
}

fn guarded(f: impl FnOnce()) {
    if let Err(err) = error::catch(f) {
        send_unhandled_error(Error::Debug(Box::new(err)));
    }
}

impl<T: Clone + 'static> Transform<T, T> for DebugTransform<T> {
    fn apply(&self, value: &Try<T>) -> Option<Try<T>> {
        match (value, &self.hooks.on_next, &self.hooks.on_error) {
            (Ok(v), Some(hook), _) => guarded(|| hook(v)),
            (Err(e), _, Some(hook)) => guarded(|| hook(e)),
            _ => {}
        }
        Some(value.clone())
    }

    fn on_start(&self) {
        if let Some(hook) = &self.hooks.on_start {
            guarded(hook);
        }
    }

    fn on_stop(&self) {
        if let Some(hook) = &self.hooks.on_stop {
            guarded(hook);
        }
    }
}

/// Hooks that log every event at debug level under `name`.
pub(crate) fn logging_hooks<T: std::fmt::Debug + 'static>(name: String) -> DebugHooks<T> {
    let (n1, n2, n3) = (name.clone(), name.clone(), name.clone());
    DebugHooks::new()
        .on_next(move |v: &T| tracing::debug!(node = %n1, value = ?v, "next"))
        .on_error(move |e: &Error| tracing::debug!(node = %n2, error = %e, "error"))
        .on_start(move || tracing::debug!(node = %n3, "started"))
        .on_stop(move || tracing::debug!(node = %name, "stopped"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{register_unhandled_error_callback, unregister_unhandled_error_callback};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn hooks_see_values_and_panics_are_reported() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        let id = register_unhandled_error_callback(move |e| sink.borrow_mut().push(e.clone()));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let tap = DebugTransform::new(DebugHooks::new().on_next(move |v: &i32| {
            s.borrow_mut().push(*v);
            if *v == 2 {
                panic!("tap broke");
            }
        }));

        assert_eq!(tap.apply(&Ok(1)), Some(Ok(1)));
        assert_eq!(tap.apply(&Ok(2)), Some(Ok(2)));
        assert_eq!(
            tap.apply(&Err(Error::failed("e"))),
            Some(Err(Error::failed("e")))
        );
        unregister_unhandled_error_callback(id);

        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(
            *errors.borrow(),
            vec![Error::Debug(Box::new(Error::Panicked("tap broke".into())))]
        );
    }
}
