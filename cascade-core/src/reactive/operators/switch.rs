//! Switch / flatten.
//!
//! A switch node follows one inner observable at a time, chosen by the
//! latest value of its outer parent. The inner's rank has nothing to do
//! with the switch node's rank, so inner values are re-emitted in a new
//! transaction rather than in the one that carried them.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{self, Try};
use crate::graph::{
    add_internal_observer, fire_signal, fire_try, maybe_will_start, remove_internal_observer,
    try_now, CurrentValue, InternalObserver, Node, NodeCore, NodeKind, Observer, SignalNode,
    Transaction,
};
use crate::reactive::{EventStream, Signal};

type Project<O, T> = Box<dyn Fn(&O) -> EventStream<T>>;

/// Stream that mirrors the stream selected by its outer parent.
pub(crate) struct SwitchStream<O: Clone + 'static, T: Clone + 'static> {
    core: NodeCore<T>,
    outer: Rc<dyn Node<O>>,
    outer_signal: Option<Rc<dyn SignalNode<O>>>,
    project: Project<O, T>,
    current_inner: RefCell<Option<Try<EventStream<T>>>>,
    inner_observer: Rc<dyn InternalObserver<T>>,
    this: Weak<Self>,
}

struct InnerInput<O: Clone + 'static, T: Clone + 'static> {
    target: Weak<SwitchStream<O, T>>,
}

impl<O: Clone + 'static, T: Clone + 'static> InternalObserver<T> for InnerInput<O, T> {
    fn on_try(&self, value: &Try<T>, _trx: &Transaction) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let value = value.clone();
        Transaction::run(move |trx| fire_try(&*target, &value, trx));
    }
}

impl<O: Clone + 'static, T: Clone + 'static> SwitchStream<O, T> {
    pub(crate) fn new<F>(
        outer: Rc<dyn Node<O>>,
        outer_signal: Option<Rc<dyn SignalNode<O>>>,
        project: F,
    ) -> Rc<Self>
    where
        F: Fn(&O) -> EventStream<T> + 'static,
    {
        let rank = outer.core().rank() + 1;
        Rc::new_cyclic(|this: &Weak<Self>| Self {
            core: NodeCore::new(NodeKind::Switch, rank),
            outer,
            outer_signal,
            project: Box::new(project),
            current_inner: RefCell::new(None),
            inner_observer: Rc::new(InnerInput {
                target: this.clone(),
            }),
            this: this.clone(),
        })
    }

    fn as_observer(&self) -> Option<Rc<dyn InternalObserver<O>>> {
        self.this
            .upgrade()
            .map(|this| this as Rc<dyn InternalObserver<O>>)
    }

    fn detach_inner(&self) {
        let previous = self.current_inner.borrow_mut().take();
        if let Some(Ok(inner)) = previous {
            remove_internal_observer(&*inner.node, &self.inner_observer);
        }
    }

    /// Switch to the inner stream for `outer_value`. Returns the failure to
    /// forward, if the outer value is one or `project` panicked.
    fn switch_to(&self, outer_value: &Try<O>) -> Option<crate::error::Error> {
        let next = match outer_value {
            Ok(value) => error::catch(|| (self.project)(value)),
            Err(err) => Err(err.clone()),
        };
        match next {
            Ok(inner) => {
                let unchanged = matches!(
                    &*self.current_inner.borrow(),
                    Some(Ok(current)) if *current == inner
                );
                if unchanged {
                    return None;
                }
                self.detach_inner();
                tracing::trace!(node = %self.core.display_name(), inner = %inner.display_name(), "switching");
                *self.current_inner.borrow_mut() = Some(Ok(inner.clone()));
                add_internal_observer(&*inner.node, self.inner_observer.clone(), true);
                None
            }
            Err(err) => {
                self.detach_inner();
                *self.current_inner.borrow_mut() = Some(Err(err.clone()));
                Some(err)
            }
        }
    }
}

impl<O: Clone + 'static, T: Clone + 'static> Node<T> for SwitchStream<O, T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn on_will_start(&self) {
        maybe_will_start(&*self.outer);
    }

    fn on_start(&self) {
        if let Some(observer) = self.as_observer() {
            add_internal_observer(&*self.outer, observer, false);
        }
        if let Some(signal) = &self.outer_signal {
            // Nothing to fire into yet: an initial failure is only recorded.
            self.switch_to(&try_now(&**signal));
        }
    }

    fn on_stop(&self) {
        if let Some(observer) = self.as_observer() {
            remove_internal_observer(&*self.outer, &observer);
        }
        self.detach_inner();
    }
}

impl<O: Clone + 'static, T: Clone + 'static> InternalObserver<O> for SwitchStream<O, T> {
    fn on_try(&self, value: &Try<O>, trx: &Transaction) {
        if let Some(err) = self.switch_to(value) {
            fire_try(self, &Err(err), trx);
        }
    }
}

/// Signal that mirrors the signal selected by its outer signal.
pub(crate) struct SwitchSignal<T: Clone + 'static> {
    core: NodeCore<T>,
    outer: Rc<dyn Node<Signal<T>>>,
    outer_signal: Rc<dyn SignalNode<Signal<T>>>,
    current_inner: RefCell<Option<Signal<T>>>,
    current: CurrentValue<T>,
    inner_observer: Rc<dyn InternalObserver<T>>,
    this: Weak<Self>,
}

struct InnerSignalInput<T: Clone + 'static> {
    target: Weak<SwitchSignal<T>>,
}

impl<T: Clone + 'static> InternalObserver<T> for InnerSignalInput<T> {
    fn on_try(&self, value: &Try<T>, _trx: &Transaction) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let value = value.clone();
        Transaction::run(move |trx| fire_signal(&*target, value, trx));
    }
}

impl<T: Clone + 'static> SwitchSignal<T> {
    pub(crate) fn new(
        outer: Rc<dyn Node<Signal<T>>>,
        outer_signal: Rc<dyn SignalNode<Signal<T>>>,
    ) -> Rc<Self> {
        let rank = outer.core().rank() + 1;
        Rc::new_cyclic(|this: &Weak<Self>| Self {
            core: NodeCore::new(NodeKind::Switch, rank),
            outer,
            outer_signal,
            current_inner: RefCell::new(None),
            current: CurrentValue::empty(),
            inner_observer: Rc::new(InnerSignalInput {
                target: this.clone(),
            }),
            this: this.clone(),
        })
    }

    fn as_observer(&self) -> Option<Rc<dyn InternalObserver<Signal<T>>>> {
        self.this
            .upgrade()
            .map(|this| this as Rc<dyn InternalObserver<Signal<T>>>)
    }

    fn detach_inner(&self) {
        let previous = self.current_inner.borrow_mut().take();
        if let Some(inner) = previous {
            remove_internal_observer(&*inner.node, &self.inner_observer);
        }
    }

    /// Follow `outer_value`. Returns the value this signal should now hold,
    /// or `None` if the inner signal did not change.
    fn switch_to(&self, outer_value: Try<Signal<T>>) -> Option<Try<T>> {
        match outer_value {
            Ok(inner) => {
                if self.current_inner.borrow().as_ref() == Some(&inner) {
                    return None;
                }
                self.detach_inner();
                *self.current_inner.borrow_mut() = Some(inner.clone());
                add_internal_observer(&*inner.node, self.inner_observer.clone(), true);
                Some(inner.try_now())
            }
            Err(err) => {
                self.detach_inner();
                Some(Err(err))
            }
        }
    }
}

impl<T: Clone + 'static> Node<T> for SwitchSignal<T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn on_will_start(&self) {
        maybe_will_start(&*self.outer);
        // The inner may have gone stale while stopped; resync it before
        // reading so the first observer sees the value `on_start` attaches to.
        let value = try_now(&*self.outer_signal).and_then(|inner| {
            maybe_will_start(&*inner.node);
            inner.try_now()
        });
        self.current.set(value);
    }

    fn on_start(&self) {
        if let Some(observer) = self.as_observer() {
            add_internal_observer(&*self.outer, observer, false);
        }
        if let Some(value) = self.switch_to(try_now(&*self.outer_signal)) {
            self.current.set(value);
        }
    }

    fn on_stop(&self) {
        if let Some(observer) = self.as_observer() {
            remove_internal_observer(&*self.outer, &observer);
        }
        self.detach_inner();
    }

    fn on_added_external_observer(&self, observer: &Observer<T>) {
        observer.on_try(&try_now(self));
    }
}

impl<T: Clone + 'static> SignalNode<T> for SwitchSignal<T> {
    fn current(&self) -> &CurrentValue<T> {
        &self.current
    }

    fn initial_value(&self) -> Try<T> {
        try_now(&*self.outer_signal).and_then(|inner| inner.try_now())
    }
}

impl<T: Clone + 'static> InternalObserver<Signal<T>> for SwitchSignal<T> {
    fn on_try(&self, value: &Try<Signal<T>>, trx: &Transaction) {
        if let Some(next) = self.switch_to(value.clone()) {
            fire_signal(self, next, trx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ownership::Owner;
    use crate::reactive::{EventBus, Var};

    #[test]
    fn follows_the_latest_inner_stream() {
        let left = EventBus::new();
        let right = EventBus::new();
        let choice = Var::new(true);
        let (l, r) = (left.stream(), right.stream());
        let switched = choice
            .signal()
            .flat_map_switch(move |go_left| if *go_left { l.clone() } else { r.clone() });

        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        switched.foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));

        left.emit(1);
        right.emit(2);
        choice.set(false);
        left.emit(3);
        right.emit(4);
        assert_eq!(*seen.borrow(), vec![1, 4]);
        assert!(!left.stream().is_started());
    }

    #[test]
    fn same_inner_is_not_restarted() {
        let starts = Rc::new(RefCell::new(0));
        let counter = starts.clone();
        let inner: EventStream<i32> = EventStream::empty().debug(
            crate::reactive::DebugHooks::new().on_start(move || *counter.borrow_mut() += 1),
        );
        let outer = EventBus::new();
        let inner2 = inner.clone();
        let switched = outer.stream().flat_map_switch(move |_: &()| inner2.clone());

        let owner = Owner::new();
        switched.foreach(&owner, |_| {});
        outer.emit(());
        outer.emit(());
        assert_eq!(*starts.borrow(), 1);
    }

    #[test]
    fn outer_failure_detaches_and_is_forwarded() {
        let inner = EventBus::new();
        let outer = EventBus::new();
        let flat = outer.stream().flatten();

        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        flat.add_observer(
            Observer::from_try(move |v: &Try<i32>| sink.borrow_mut().push(v.clone())),
            &owner,
        );

        outer.emit(inner.stream());
        inner.emit(1);
        outer.emit_try(Err(Error::failed("outer")));
        inner.emit(2);
        assert_eq!(*seen.borrow(), vec![Ok(1), Err(Error::failed("outer"))]);
        assert!(!inner.stream().is_started());
    }

    #[test]
    fn flattened_signal_tracks_current_inner() {
        let a = Var::new(1);
        let b = Var::new(100);
        let which = Var::new(a.signal());
        let flat = which.signal().flatten();
        assert_eq!(flat.try_now(), Ok(1));

        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        flat.foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));

        a.set(2);
        which.set(b.signal());
        b.set(101);
        a.set(3);
        assert_eq!(*seen.borrow(), vec![1, 2, 100, 101]);
        assert_eq!(flat.now(), Some(101));
    }

    #[test]
    fn flattened_signal_resyncs_a_stale_inner_on_start() {
        let a = Var::new(1);
        let derived = a.signal().map(|x| x + 1);
        assert_eq!(derived.now(), Some(2));
        a.set(5);

        let flat = Var::new(derived).signal().flatten();
        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        flat.foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));

        assert_eq!(*seen.borrow(), vec![6]);
        assert_eq!(flat.now(), Some(6));
    }
}
