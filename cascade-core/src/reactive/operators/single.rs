//! Single-parent nodes.
//!
//! Map, filter, drop, recover and debug differ only in what they do with
//! each parent value, so they share one stream node and one signal node
//! parameterized by a [`Transform`].
//!
//! ```text
//! Stopped --(first observer)--> Starting: parent.maybe_will_start()
//!         --> Started: attached to parent as an internal observer
//!         --(last observer removed)--> Stopped: detached from parent
//! ```

use std::cell::Cell;
use std::rc::{Rc, Weak};

use crate::error::{Error, Try};
use crate::graph::{
    add_internal_observer, fire_signal, fire_try, last_update_id, maybe_will_start,
    remove_internal_observer, try_now, CurrentValue, InternalObserver, Node, NodeCore, NodeKind,
    Observer, SignalNode, Transaction,
};

/// What a single-parent node does with each parent value.
pub(crate) trait Transform<A, B>: 'static {
    /// `None` means "emit nothing for this value".
    fn apply(&self, value: &Try<A>) -> Option<Try<B>>;

    fn on_start(&self) {}

    fn on_stop(&self) {}
}

/// Stream node with a single parent (stream or signal).
pub(crate) struct StreamOp<A: 'static, B: 'static, F> {
    core: NodeCore<B>,
    parent: Rc<dyn Node<A>>,
    transform: F,
    this: Weak<Self>,
}

impl<A: 'static, B: 'static, F: Transform<A, B>> StreamOp<A, B, F> {
    pub(crate) fn new(kind: NodeKind, parent: Rc<dyn Node<A>>, transform: F) -> Rc<Self> {
        let rank = parent.core().rank() + 1;
        Rc::new_cyclic(|this| Self {
            core: NodeCore::new(kind, rank),
            parent,
            transform,
            this: this.clone(),
        })
    }

    fn as_observer(&self) -> Option<Rc<dyn InternalObserver<A>>> {
        self.this
            .upgrade()
            .map(|this| this as Rc<dyn InternalObserver<A>>)
    }
}

impl<A: 'static, B: 'static, F: Transform<A, B>> Node<B> for StreamOp<A, B, F> {
    fn core(&self) -> &NodeCore<B> {
        &self.core
    }

    fn on_will_start(&self) {
        maybe_will_start(&*self.parent);
    }

    fn on_start(&self) {
        if let Some(observer) = self.as_observer() {
            add_internal_observer(&*self.parent, observer, false);
        }
        self.transform.on_start();
    }

    fn on_stop(&self) {
        if let Some(observer) = self.as_observer() {
            remove_internal_observer(&*self.parent, &observer);
        }
        self.transform.on_stop();
    }
}

impl<A: 'static, B: 'static, F: Transform<A, B>> InternalObserver<A> for StreamOp<A, B, F> {
    fn on_try(&self, value: &Try<A>, trx: &Transaction) {
        if let Some(next) = self.transform.apply(value) {
            fire_try(self, &next, trx);
        }
    }
}

/// Signal node with a signal parent.
///
/// While stopped the node does not hear from its parent, so on restart it
/// compares the parent's update id with the one it last saw and recomputes
/// its current value if the parent moved on.
pub(crate) struct SignalOp<A: Clone + 'static, B: Clone + 'static, F> {
    core: NodeCore<B>,
    parent: Rc<dyn Node<A>>,
    parent_signal: Rc<dyn SignalNode<A>>,
    parent_update_id: Cell<u64>,
    current: CurrentValue<B>,
    transform: F,
    this: Weak<Self>,
}

impl<A, B, F> SignalOp<A, B, F>
where
    A: Clone + 'static,
    B: Clone + 'static,
    F: Transform<A, B>,
{
    pub(crate) fn new(
        kind: NodeKind,
        parent: Rc<dyn Node<A>>,
        parent_signal: Rc<dyn SignalNode<A>>,
        transform: F,
    ) -> Rc<Self> {
        let rank = parent.core().rank() + 1;
        Rc::new_cyclic(|this| Self {
            core: NodeCore::new(kind, rank),
            parent,
            parent_signal,
            parent_update_id: Cell::new(0),
            current: CurrentValue::empty(),
            transform,
            this: this.clone(),
        })
    }

    fn as_observer(&self) -> Option<Rc<dyn InternalObserver<A>>> {
        self.this
            .upgrade()
            .map(|this| this as Rc<dyn InternalObserver<A>>)
    }
}

impl<A, B, F> Node<B> for SignalOp<A, B, F>
where
    A: Clone + 'static,
    B: Clone + 'static,
    F: Transform<A, B>,
{
    fn core(&self) -> &NodeCore<B> {
        &self.core
    }

    fn on_will_start(&self) {
        maybe_will_start(&*self.parent);
        if last_update_id(&*self.parent_signal) != self.parent_update_id.get() {
            let value = self.initial_value();
            self.current.set(value);
        }
    }

    fn on_start(&self) {
        if let Some(observer) = self.as_observer() {
            add_internal_observer(&*self.parent, observer, false);
        }
        self.transform.on_start();
    }

    fn on_stop(&self) {
        if let Some(observer) = self.as_observer() {
            remove_internal_observer(&*self.parent, &observer);
        }
        self.transform.on_stop();
    }

    fn on_added_external_observer(&self, observer: &Observer<B>) {
        observer.on_try(&try_now(self));
    }
}

impl<A, B, F> SignalNode<B> for SignalOp<A, B, F>
where
    A: Clone + 'static,
    B: Clone + 'static,
    F: Transform<A, B>,
{
    fn current(&self) -> &CurrentValue<B> {
        &self.current
    }

    fn initial_value(&self) -> Try<B> {
        let parent_value = try_now(&*self.parent_signal);
        self.parent_update_id
            .set(self.parent_signal.current().update_id());
        match (self.transform.apply(&parent_value), parent_value) {
            (Some(value), _) => value,
            // A signal always has a value; a swallowed failure stays a failure.
            (None, Err(err)) => Err(err),
            (None, Ok(_)) => Err(Error::failed(format!(
                "{} produced no initial value",
                self.core.display_name()
            ))),
        }
    }
}

impl<A, B, F> InternalObserver<A> for SignalOp<A, B, F>
where
    A: Clone + 'static,
    B: Clone + 'static,
    F: Transform<A, B>,
{
    fn on_try(&self, value: &Try<A>, trx: &Transaction) {
        self.parent_update_id
            .set(self.parent_signal.current().update_id());
        if let Some(next) = self.transform.apply(value) {
            fire_signal(self, next, trx);
        }
    }
}

/// Pass values through unchanged. Used by `changes()`.
pub(crate) struct Identity;

impl<A: Clone + 'static> Transform<A, A> for Identity {
    fn apply(&self, value: &Try<A>) -> Option<Try<A>> {
        Some(value.clone())
    }
}
