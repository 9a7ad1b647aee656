//! Event streams.

use std::fmt::Debug;
use std::rc::Rc;

use crate::error::{Error, Try};
use crate::graph::{add_external_observer, Node, NodeId, NodeKind, Observer};
use crate::ownership::{DynamicOwner, DynamicSubscription, Owner, Subscription};

use super::operators::{
    combine_reads, logging_hooks, read_slot, CollectTransform, CombineInput, CombineNode,
    DebugHooks, DebugTransform, DropTransform, Input, LiftTry, MapTransform, MergeStream,
    Recovery, StreamOp, StreamToSignal, SwitchStream, ThrowFailures, Transform,
};
use super::Signal;

/// A stream of events with no current value.
///
/// Handles are cheap to clone; clones refer to the same node, and two
/// handles compare equal exactly when they do.
pub struct EventStream<T: 'static> {
    pub(crate) node: Rc<dyn Node<T>>,
}

impl<T: 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: 'static> PartialEq for EventStream<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.node), Rc::as_ptr(&other.node))
    }
}

impl<T: 'static> Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("name", &self.node.core().display_name())
            .field("rank", &self.node.core().rank())
            .finish()
    }
}

impl<T: 'static> EventStream<T> {
    pub(crate) fn from_node(node: Rc<dyn Node<T>>) -> Self {
        Self { node }
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

    /// Set the name used in logs and `Debug` output.
    pub fn set_display_name(&self, name: impl Into<String>) {
        self.node.core().set_display_name(name);
    }

    /// Builder form of [`set_display_name`](Self::set_display_name).
    pub fn named(self, name: impl Into<String>) -> Self {
        self.set_display_name(name);
        self
    }

    /// Observe this stream until `owner` kills the returned subscription.
    pub fn add_observer(&self, observer: Observer<T>, owner: &Owner) -> Subscription {
        add_external_observer(&self.node, observer, owner)
    }

    /// Observe this stream while `owner` is active, re-subscribing on every
    /// activation.
    pub fn add_dynamic_observer(
        &self,
        observer: Observer<T>,
        owner: &DynamicOwner,
    ) -> DynamicSubscription {
        let stream = self.clone();
        DynamicSubscription::new(
            owner,
            move |owner| Some(stream.add_observer(observer.clone(), owner)),
            false,
        )
    }

    /// Run `f` for every value. Failures go to the unhandled-error registry.
    pub fn foreach<F>(&self, owner: &Owner, f: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.add_observer(Observer::new(f), owner)
    }
}

impl<T: Clone + 'static> EventStream<T> {
    fn op<B: Clone + 'static>(&self, kind: NodeKind, transform: impl Transform<T, B>) -> EventStream<B> {
        EventStream::from_node(StreamOp::new(kind, self.node.clone(), transform))
    }

    /// Apply `project` to every value. A panic in `project` is emitted as a
    /// failure.
    pub fn map<B, F>(&self, project: F) -> EventStream<B>
    where
        B: Clone + 'static,
        F: Fn(&T) -> B + 'static,
    {
        self.op(NodeKind::Map, MapTransform::new(move |v: &T| Ok(project(v))))
    }

    /// Like [`map`](Self::map), for projections that can fail.
    pub fn try_map<B, F>(&self, project: F) -> EventStream<B>
    where
        B: Clone + 'static,
        F: Fn(&T) -> Try<B> + 'static,
    {
        self.op(NodeKind::Map, MapTransform::new(project))
    }

    /// Replace every value with `value`.
    pub fn map_to<B: Clone + 'static>(&self, value: B) -> EventStream<B> {
        self.map(move |_| value.clone())
    }

    pub fn filter<F>(&self, pred: F) -> EventStream<T>
    where
        F: Fn(&T) -> bool + 'static,
    {
        self.op(
            NodeKind::Filter,
            CollectTransform::new(move |v: &T| pred(v).then(|| v.clone())),
        )
    }

    /// Map and filter in one step: values for which `f` returns `None` are
    /// dropped.
    pub fn collect<B, F>(&self, f: F) -> EventStream<B>
    where
        B: Clone + 'static,
        F: Fn(&T) -> Option<B> + 'static,
    {
        self.op(NodeKind::Filter, CollectTransform::new(f))
    }

    /// Skip the first `count` events, failures included.
    pub fn drop(&self, count: u32, reset_on_stop: bool) -> EventStream<T> {
        self.op(
            NodeKind::Drop,
            DropTransform::<T>::new(move |_, dropped| dropped < count, reset_on_stop),
        )
    }

    /// Skip events until `pred` first returns false. Failures are skipped
    /// while skipping.
    pub fn drop_while<F>(&self, pred: F, reset_on_stop: bool) -> EventStream<T>
    where
        F: Fn(&T) -> bool + 'static,
    {
        self.op(
            NodeKind::Drop,
            DropTransform::new(
                move |value: &Try<T>, _| match value {
                    Ok(v) => pred(v),
                    Err(_) => true,
                },
                reset_on_stop,
            ),
        )
    }

    /// Handle failures from upstream, see [`Recovery`].
    pub fn recover<F>(&self, f: F) -> EventStream<T>
    where
        F: Fn(&Error) -> Recovery<T> + 'static,
    {
        self.op(NodeKind::Map, MapTransform::recover(f))
    }

    /// Emit successes and failures alike as values.
    pub fn recover_to_try(&self) -> EventStream<Try<T>> {
        self.op(NodeKind::Map, LiftTry)
    }

    pub fn debug(&self, hooks: DebugHooks<T>) -> EventStream<T> {
        self.op(NodeKind::Debug, DebugTransform::new(hooks))
    }

    /// Log every event and lifecycle change at debug level.
    pub fn debug_log(&self) -> EventStream<T>
    where
        T: Debug,
    {
        self.debug(logging_hooks(self.display_name()))
    }

    /// Merge several streams into one. Values that arrive in the same
    /// transaction are emitted one per transaction, in arrival order.
    pub fn merge(parents: impl IntoIterator<Item = EventStream<T>>) -> EventStream<T> {
        let parents = parents.into_iter().map(|p| p.node).collect();
        EventStream::from_node(MergeStream::new(parents))
    }

    pub fn merge_with(&self, other: &EventStream<T>) -> EventStream<T> {
        Self::merge([self.clone(), other.clone()])
    }

    /// Emit `f(a, b)` whenever either stream emits, once both have.
    pub fn combine_with<B, Out, F>(&self, other: &EventStream<B>, f: F) -> EventStream<Out>
    where
        B: Clone + 'static,
        Out: Clone + 'static,
        F: Fn(&T, &B) -> Out + 'static,
    {
        let (a, slot_a) = Input::stream(self.node.clone());
        let (b, slot_b) = Input::stream(other.node.clone());
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
            false,
        );
        EventStream::from_node(node)
    }

    /// Emit the latest value of every parent, in order, once all have one.
    pub fn combine_all(parents: Vec<EventStream<T>>) -> EventStream<Vec<T>> {
        let (inputs, slots): (Vec<Rc<dyn CombineInput>>, Vec<_>) = parents
            .into_iter()
            .map(|parent| {
                let (input, slot) = Input::stream(parent.node);
                (input as Rc<dyn CombineInput>, slot)
            })
            .unzip();
        let node = CombineNode::new(
            inputs,
            move || {
                let mut errors = Vec::new();
                let values: Option<Vec<T>> = slots
                    .iter()
                    .enumerate()
                    .map(|(index, slot)| read_slot(slot, index, &mut errors))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .collect();
                combine_reads(values, errors)
            },
            false,
        );
        EventStream::from_node(node)
    }

    /// Mirror the stream returned by `f` for the latest event, dropping the
    /// previous one.
    pub fn flat_map_switch<U, F>(&self, f: F) -> EventStream<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> EventStream<U> + 'static,
    {
        EventStream::from_node(SwitchStream::new(self.node.clone(), None, f))
    }

    /// Signal holding the last event, `initial` until there is one.
    pub fn start_with(&self, initial: T) -> Signal<T> {
        Signal::from_node(StreamToSignal::new(self.node.clone(), Ok(initial)))
    }

    /// Signal holding the last event, `None` until there is one.
    pub fn to_signal(&self) -> Signal<Option<T>> {
        self.map(|v| Some(v.clone())).start_with(None)
    }
}

impl<T: Clone + 'static> EventStream<EventStream<T>> {
    /// Mirror the latest inner stream.
    pub fn flatten(&self) -> EventStream<T> {
        self.flat_map_switch(EventStream::clone)
    }
}

impl<T: Clone + 'static> EventStream<Try<T>> {
    /// Inverse of [`recover_to_try`](EventStream::recover_to_try).
    pub fn throw_failures(&self) -> EventStream<T> {
        self.op(NodeKind::Map, ThrowFailures)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::reactive::EventBus;

    fn collect<T: Clone + 'static>(stream: &EventStream<T>, owner: &Owner) -> Rc<RefCell<Vec<Try<T>>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        stream.add_observer(
            Observer::from_try(move |v: &Try<T>| sink.borrow_mut().push(v.clone())),
            owner,
        );
        seen
    }

    #[test]
    fn chain_of_single_parent_operators() {
        let bus = EventBus::new();
        let owner = Owner::new();
        let out = bus
            .stream()
            .drop(1, false)
            .filter(|x: &i32| x % 2 == 0)
            .map(|x| x * 100);
        let seen = collect(&out, &owner);

        for x in 0..6 {
            bus.emit(x);
        }
        assert_eq!(*seen.borrow(), vec![Ok(200), Ok(400)]);
        assert_eq!(out.rank(), 4);
    }

    #[test]
    fn drop_while_skips_failures_while_skipping() {
        let bus = EventBus::new();
        let owner = Owner::new();
        let out = bus.stream().drop_while(|x: &i32| *x < 3, false);
        let seen = collect(&out, &owner);

        bus.emit(1);
        bus.emit_try(Err(Error::failed("early")));
        bus.emit(3);
        bus.emit_try(Err(Error::failed("late")));
        bus.emit(1);
        assert_eq!(
            *seen.borrow(),
            vec![Ok(3), Err(Error::failed("late")), Ok(1)]
        );
    }

    #[test]
    fn recover_then_throw_round_trip() {
        let bus = EventBus::new();
        let owner = Owner::new();
        let lifted = bus.stream().recover_to_try();
        let lifted_seen = collect(&lifted, &owner);
        let thrown_seen = collect(&lifted.throw_failures(), &owner);

        bus.emit(1);
        bus.emit_try(Err(Error::failed("f")));
        assert_eq!(
            *lifted_seen.borrow(),
            vec![Ok(Ok(1)), Ok(Err(Error::failed("f")))]
        );
        assert_eq!(*thrown_seen.borrow(), vec![Ok(1), Err(Error::failed("f"))]);
    }

    #[test]
    fn to_signal_starts_empty() {
        let bus = EventBus::new();
        let latest = bus.stream().to_signal();
        let owner = Owner::new();
        latest.foreach(&owner, |_| {});
        assert_eq!(latest.now(), Some(None));
        bus.emit('x');
        assert_eq!(latest.now(), Some(Some('x')));
    }

    #[test]
    fn dynamic_observer_follows_activation() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let owner = DynamicOwner::new();
        bus.stream()
            .add_dynamic_observer(Observer::new(move |v: &u8| sink.borrow_mut().push(*v)), &owner);

        bus.emit(1);
        owner.activate();
        bus.emit(2);
        owner.deactivate();
        bus.emit(3);
        owner.activate();
        bus.emit(4);
        assert_eq!(*seen.borrow(), vec![2, 4]);
    }

    #[test]
    fn handles_compare_by_node() {
        let bus: EventBus<i32> = EventBus::new();
        let a = bus.stream();
        assert_eq!(a, a.clone());
        assert_eq!(a, bus.stream());
        assert_ne!(a, a.map(|x| *x));
        assert!(a.clone().named("clicks").display_name() == "clicks");
    }
}
