//! Stream to signal.

use std::rc::{Rc, Weak};

use crate::error::Try;
use crate::graph::{
    add_internal_observer, fire_signal, maybe_will_start, remove_internal_observer, try_now,
    CurrentValue, InternalObserver, Node, NodeCore, NodeKind, Observer, SignalNode, Transaction,
};

/// Signal holding the last value of a stream, `initial` until the first.
///
/// The last value survives a restart: a stopped stream has no value to
/// resync from.
pub(crate) struct StreamToSignal<T: Clone + 'static> {
    core: NodeCore<T>,
    parent: Rc<dyn Node<T>>,
    initial: Try<T>,
    current: CurrentValue<T>,
    this: Weak<Self>,
}

impl<T: Clone + 'static> StreamToSignal<T> {
    pub(crate) fn new(parent: Rc<dyn Node<T>>, initial: Try<T>) -> Rc<Self> {
        let rank = parent.core().rank() + 1;
        Rc::new_cyclic(|this| Self {
            core: NodeCore::new(NodeKind::Convert, rank),
            parent,
            initial,
            current: CurrentValue::empty(),
            this: this.clone(),
        })
    }

    fn as_observer(&self) -> Option<Rc<dyn InternalObserver<T>>> {
        self.this
            .upgrade()
            .map(|this| this as Rc<dyn InternalObserver<T>>)
    }
}

impl<T: Clone + 'static> Node<T> for StreamToSignal<T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn on_will_start(&self) {
        maybe_will_start(&*self.parent);
    }

    fn on_start(&self) {
        if let Some(observer) = self.as_observer() {
            add_internal_observer(&*self.parent, observer, false);
        }
    }

    fn on_stop(&self) {
        if let Some(observer) = self.as_observer() {
            remove_internal_observer(&*self.parent, &observer);
        }
    }

    fn on_added_external_observer(&self, observer: &Observer<T>) {
        observer.on_try(&try_now(self));
    }
}

impl<T: Clone + 'static> SignalNode<T> for StreamToSignal<T> {
    fn current(&self) -> &CurrentValue<T> {
        &self.current
    }

    fn initial_value(&self) -> Try<T> {
        self.initial.clone()
    }
}

impl<T: Clone + 'static> InternalObserver<T> for StreamToSignal<T> {
    fn on_try(&self, value: &Try<T>, trx: &Transaction) {
        fire_signal(self, value.clone(), trx);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::ownership::Owner;
    use crate::reactive::{EventBus, Var};

    #[test]
    fn keeps_last_value_across_restarts() {
        let bus = EventBus::new();
        let latest = bus.stream().start_with(0);
        assert_eq!(latest.now(), Some(0));

        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        latest.foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));
        bus.emit(5);
        owner.kill_subscriptions();
        bus.emit(6);

        assert_eq!(*seen.borrow(), vec![0, 5]);
        assert_eq!(latest.now(), Some(5));
    }

    #[test]
    fn changes_skips_the_current_value() {
        let var = Var::new(1);
        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        var.signal()
            .changes()
            .foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));
        var.set(2);
        var.update(|v| v + 1);
        assert_eq!(*seen.borrow(), vec![2, 3]);
    }
}
