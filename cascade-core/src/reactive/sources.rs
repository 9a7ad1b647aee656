//! Event buses and vars.
//!
//! The two ways to push values into the graph from outside. Every `emit`
//! or `set` opens a transaction of its own; use [`EventBus::emit_in`] and
//! [`Var::set_in`] to write several sources in one transaction.

use std::rc::Rc;

use crate::error::{self, Try};
use crate::graph::{
    fire_signal, fire_try, try_now, CurrentValue, Node, NodeCore, Observer, SignalNode,
    Transaction,
};

use super::{EventStream, Signal};

struct BusNode<T> {
    core: NodeCore<T>,
}

impl<T: 'static> Node<T> for BusNode<T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }
}

/// A stream source fed by [`emit`](EventBus::emit).
pub struct EventBus<T: 'static> {
    node: Rc<BusNode<T>>,
}

impl<T: 'static> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            node: Rc::new(BusNode {
                core: NodeCore::source(),
            }),
        }
    }

    /// The stream of emitted values.
    pub fn stream(&self) -> EventStream<T> {
        EventStream::from_node(self.node.clone())
    }

    /// Emit `value` in a new transaction.
    pub fn emit(&self, value: T) {
        self.emit_try(Ok(value));
    }

    /// Emit a value or a failure in a new transaction.
    pub fn emit_try(&self, value: Try<T>) {
        let node = self.node.clone();
        Transaction::run(move |trx| fire_try(&*node, &value, trx));
    }

    /// Emit `value` as part of `trx`.
    pub fn emit_in(&self, trx: &Transaction, value: T) {
        fire_try(&*self.node, &Ok(value), trx);
    }
}

struct VarNode<T: Clone> {
    core: NodeCore<T>,
    current: CurrentValue<T>,
}

impl<T: Clone + 'static> Node<T> for VarNode<T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn on_added_external_observer(&self, observer: &Observer<T>) {
        observer.on_try(&try_now(self));
    }
}

impl<T: Clone + 'static> SignalNode<T> for VarNode<T> {
    fn current(&self) -> &CurrentValue<T> {
        &self.current
    }

    fn initial_value(&self) -> Try<T> {
        // Set at construction and never cleared.
        self.current
            .get()
            .unwrap_or_else(|| Err(error::Error::failed("var has no value")))
    }
}

/// A signal source holding a value that can be set from outside.
pub struct Var<T: Clone + 'static> {
    node: Rc<VarNode<T>>,
}

impl<T: Clone + 'static> Clone for Var<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> Var<T> {
    pub fn new(initial: T) -> Self {
        Self::from_try(Ok(initial))
    }

    /// A var whose initial value may be a failure.
    pub fn from_try(initial: Try<T>) -> Self {
        let current = CurrentValue::empty();
        current.set(initial);
        Self {
            node: Rc::new(VarNode {
                core: NodeCore::source(),
                current,
            }),
        }
    }

    pub fn signal(&self) -> Signal<T> {
        Signal::from_node(self.node.clone())
    }

    pub fn try_now(&self) -> Try<T> {
        try_now(&*self.node)
    }

    pub fn now(&self) -> Option<T> {
        self.try_now().ok()
    }

    /// Set a new value in a new transaction.
    ///
    /// Inside a running transaction the new value is visible only once the
    /// child transaction runs.
    pub fn set(&self, value: T) {
        self.set_try(Ok(value));
    }

    pub fn set_try(&self, value: Try<T>) {
        let node = self.node.clone();
        Transaction::run(move |trx| fire_signal(&*node, value, trx));
    }

    /// Set `value` as part of `trx`.
    pub fn set_in(&self, trx: &Transaction, value: T) {
        fire_signal(&*self.node, Ok(value), trx);
    }

    /// Replace the value with `f(current)` in a new transaction. `f` sees
    /// the value current when the transaction runs. A panic in `f`, or a
    /// current failure, stores a failure.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T + 'static,
    {
        let node = self.node.clone();
        Transaction::run(move |trx| {
            let next = try_now(&*node).and_then(|current| error::catch(|| f(&current)));
            fire_signal(&*node, next, trx);
        });
    }
}

impl<T: Clone + 'static> EventStream<T> {
    /// A stream that emits `value` every time it starts, once the observer
    /// that started it is in place.
    pub fn from_value(value: T) -> EventStream<T> {
        EventStream::from_custom_source(move |ctx| {
            let value = value.clone();
            super::SourceConfig::new().on_start(move || ctx.fire_value(value.clone()))
        })
    }

    /// A stream that never emits.
    pub fn empty() -> EventStream<T> {
        EventStream::from_node(Rc::new(BusNode {
            core: NodeCore::source(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::Error;
    use crate::ownership::Owner;

    #[test]
    fn var_update_reads_value_at_run_time() {
        let var = Var::new(1);
        let v = var.clone();
        Transaction::run(move |_| {
            v.set(5);
            v.update(|x| x * 10);
            assert_eq!(v.now(), Some(1));
        });
        assert_eq!(var.now(), Some(50));

        var.update(|_| panic!("no"));
        assert_eq!(var.try_now(), Err(Error::Panicked("no".into())));
        var.update(|x| x + 1);
        assert_eq!(var.try_now(), Err(Error::Panicked("no".into())));
    }

    #[test]
    fn from_value_emits_on_every_start() {
        let stream = EventStream::from_value("hello");
        let seen = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let owner = Owner::new();
            let sink = seen.clone();
            stream.foreach(&owner, move |v: &&str| sink.borrow_mut().push(("first", *v)));
            // Already started: the second observer does not see a replay.
            let sink = seen.clone();
            stream.foreach(&owner, move |v: &&str| sink.borrow_mut().push(("second", *v)));
        }
        assert_eq!(
            *seen.borrow(),
            vec![("first", "hello"), ("first", "hello")]
        );
    }

    #[test]
    fn batch_writes_share_a_transaction() {
        let a = Var::new(0);
        let b = Var::new(0);
        let sum = a.signal().combine_with(&b.signal(), |x, y| x + y);
        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        sum.foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));

        let (a2, b2) = (a.clone(), b.clone());
        Transaction::run(move |trx| {
            a2.set_in(trx, 1);
            b2.set_in(trx, 2);
        });
        assert_eq!(*seen.borrow(), vec![0, 3]);
    }
}
