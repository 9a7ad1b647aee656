//! Signal Handles
//!
//! A Signal is an observable with a current value. Unlike a stream it can
//! be read at any time with [`Signal::try_now`], and every new observer is
//! handed the current value as soon as it is added.
//!
//! # Laziness
//!
//! A derived signal computes its value on first read and then only updates
//! while started. When it restarts it compares its parents' update ids
//! with the ones it last saw and recomputes if any of them moved on, so a
//! signal that was stopped for a while never reports a stale value.

use std::fmt::Debug;
use std::rc::Rc;

use crate::error::{Error, Try};
use crate::graph::{
    add_external_observer, try_now, Node, NodeId, NodeKind, Observer, SignalNode,
};
use crate::ownership::{DynamicOwner, DynamicSubscription, Owner, Subscription};

use super::operators::{
    combine_reads, logging_hooks, read_slot, CombineInput, CombineNode, DebugHooks,
    DebugTransform, Identity, Input, MapTransform, Recovery, SignalOp, StreamOp, SwitchSignal,
    SwitchStream, Transform,
};
use super::EventStream;

/// An observable with a current value.
///
/// Handles are cheap to clone and compare equal when they refer to the
/// same node.
pub struct Signal<T: Clone + 'static> {
    pub(crate) node: Rc<dyn Node<T>>,
    pub(crate) signal: Rc<dyn SignalNode<T>>,
}

impl<T: Clone + 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
            signal: Rc::clone(&self.signal),
        }
    }
}

impl<T: Clone + 'static> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.node), Rc::as_ptr(&other.node))
    }
}

impl<T: Clone + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.node.core().display_name())
            .field("rank", &self.node.core().rank())
            .finish()
    }
}

impl<T: Clone + 'static> Signal<T> {
    pub(crate) fn from_node<N: SignalNode<T>>(node: Rc<N>) -> Self {
        Self {
            node: node.clone(),
            signal: node,
        }
    }

    /// The current value, computing it if this signal was never read.
    pub fn try_now(&self) -> Try<T> {
        try_now(&*self.signal)
    }

    /// The current value, or `None` if it is a failure.
    pub fn now(&self) -> Option<T> {
        self.try_now().ok()
    }

    pub fn id(&self) -> NodeId {
        self.node.core().id()
    }

    pub fn kind(&self) -> NodeKind {
        self.node.core().kind()
    }

    pub fn rank(&self) -> usize {
        self.node.core().rank()
    }

    pub fn is_started(&self) -> bool {
        self.node.core().is_started()
    }

    pub fn observer_count(&self) -> usize {
        self.node.core().observer_count()
    }

    pub fn display_name(&self) -> String {
        self.node.core().display_name()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        self.node.core().set_display_name(name);
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        self.set_display_name(name);
        self
    }

    /// Observe this signal until `owner` kills the returned subscription.
    /// The observer receives the current value right away.
    pub fn add_observer(&self, observer: Observer<T>, owner: &Owner) -> Subscription {
        add_external_observer(&self.node, observer, owner)
    }

    pub fn add_dynamic_observer(
        &self,
        observer: Observer<T>,
        owner: &DynamicOwner,
    ) -> DynamicSubscription {
        let signal = self.clone();
        DynamicSubscription::new(
            owner,
            move |owner| Some(signal.add_observer(observer.clone(), owner)),
            false,
        )
    }

    pub fn foreach<F>(&self, owner: &Owner, f: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.add_observer(Observer::new(f), owner)
    }

    fn op<B: Clone + 'static>(&self, kind: NodeKind, transform: impl Transform<T, B>) -> Signal<B> {
        Signal::from_node(SignalOp::new(
            kind,
            self.node.clone(),
            self.signal.clone(),
            transform,
        ))
    }

    pub fn map<B, F>(&self, project: F) -> Signal<B>
    where
        B: Clone + 'static,
        F: Fn(&T) -> B + 'static,
    {
        self.op(NodeKind::Map, MapTransform::new(move |v: &T| Ok(project(v))))
    }

    pub fn try_map<B, F>(&self, project: F) -> Signal<B>
    where
        B: Clone + 'static,
        F: Fn(&T) -> Try<B> + 'static,
    {
        self.op(NodeKind::Map, MapTransform::new(project))
    }

    /// Handle failures, see [`Recovery`]. A skipped failure leaves the
    /// previous value in place; skipping the initial value keeps the
    /// failure.
    pub fn recover<F>(&self, f: F) -> Signal<T>
    where
        F: Fn(&Error) -> Recovery<T> + 'static,
    {
        self.op(NodeKind::Map, MapTransform::recover(f))
    }

    pub fn debug(&self, hooks: DebugHooks<T>) -> Signal<T> {
        self.op(NodeKind::Debug, DebugTransform::new(hooks))
    }

    pub fn debug_log(&self) -> Signal<T>
    where
        T: Debug,
    {
        self.debug(logging_hooks(self.display_name()))
    }

    /// Stream of updates, without the current value.
    pub fn changes(&self) -> EventStream<T> {
        EventStream::from_node(StreamOp::new(NodeKind::Convert, self.node.clone(), Identity))
    }

    /// Signal of `f(a, b)` over both current values.
    pub fn combine_with<B, Out, F>(&self, other: &Signal<B>, f: F) -> Signal<Out>
    where
        B: Clone + 'static,
        Out: Clone + 'static,
        F: Fn(&T, &B) -> Out + 'static,
    {
        let (a, slot_a) = Input::signal(self.node.clone(), self.signal.clone());
        let (b, slot_b) = Input::signal(other.node.clone(), other.signal.clone());
        let inputs: Vec<Rc<dyn CombineInput>> =
            vec![a as Rc<dyn CombineInput>, b as Rc<dyn CombineInput>];
        let node = CombineNode::new(
            inputs,
            move || {
                let mut errors = Vec::new();
                let a = read_slot(&slot_a, 0, &mut errors);
                let b = read_slot(&slot_b, 1, &mut errors);
                combine_reads(a.zip(b), errors).map(|(a, b)| f(&a, &b))
            },
            true,
        );
        Signal::from_node(node)
    }

    /// Signal of every parent's current value, in order.
    pub fn combine_all(parents: Vec<Signal<T>>) -> Signal<Vec<T>> {
        let (inputs, slots): (Vec<Rc<dyn CombineInput>>, Vec<_>) = parents
            .into_iter()
            .map(|parent| {
                let (input, slot) = Input::signal(parent.node, parent.signal);
                (input as Rc<dyn CombineInput>, slot)
            })
            .unzip();
        let node = CombineNode::new(
            inputs,
            move || {
                let mut errors = Vec::new();
                let values: Vec<Option<T>> = slots
                    .iter()
                    .enumerate()
                    .map(|(index, slot)| read_slot(slot, index, &mut errors))
                    .collect();
                let values: Option<Vec<T>> = values.into_iter().collect();
                combine_reads(values, errors)
            },
            true,
        );
        Signal::from_node(node)
    }

    /// Mirror the stream returned by `f` for the current value.
    pub fn flat_map_switch<U, F>(&self, f: F) -> EventStream<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> EventStream<U> + 'static,
    {
        EventStream::from_node(SwitchStream::new(
            self.node.clone(),
            Some(self.signal.clone()),
            f,
        ))
    }
}

impl<T: Clone + 'static> Signal<EventStream<T>> {
    /// Mirror the current inner stream.
    pub fn flatten(&self) -> EventStream<T> {
        self.flat_map_switch(EventStream::clone)
    }
}

impl<T: Clone + 'static> Signal<Signal<T>> {
    /// Signal whose value is always the current inner signal's value.
    pub fn flatten(&self) -> Signal<T> {
        Signal::from_node(SwitchSignal::new(self.node.clone(), self.signal.clone()))
    }
}
