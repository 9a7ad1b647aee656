//! Graph Nodes
//!
//! State shared by every observable: identity, rank, display name, the
//! two observer lists and the start/stop lifecycle.
//!
//! A node is started while it has at least one observer, external or
//! internal. Derived nodes attach themselves to their parents as internal
//! observers when they start and detach when they stop, so a whole chain
//! starts and stops with its last consumer.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::observer::Observer;
use super::scheduler::Transaction;
use crate::error::Try;
use crate::ownership::{Owner, Subscription};

/// Unique identifier for a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A root fed from outside the graph (bus, var, custom source).
    Source,
    /// `map`, `try_map`, `recover` and friends.
    Map,
    /// `filter` and `collect`.
    Filter,
    /// `drop` and `drop_while`.
    Drop,
    /// Debug taps.
    Debug,
    /// Merge of several streams.
    Merge,
    /// Combine-latest of several parents.
    Combine,
    /// Switch / flatten.
    Switch,
    /// Stream-to-signal and signal-to-stream conversions.
    Convert,
}

impl NodeKind {
    fn label(self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Map => "map",
            NodeKind::Filter => "filter",
            NodeKind::Drop => "drop",
            NodeKind::Debug => "debug",
            NodeKind::Merge => "merge",
            NodeKind::Combine => "combine",
            NodeKind::Switch => "switch",
            NodeKind::Convert => "convert",
        }
    }
}

/// Receives values from a parent node. Only derived nodes implement this;
/// it is how the graph is wired together.
pub(crate) trait InternalObserver<T>: 'static {
    fn on_try(&self, value: &Try<T>, trx: &Transaction);
}

/// Lifecycle hooks and shared state of a node.
pub(crate) trait Node<T: 'static>: 'static {
    fn core(&self) -> &NodeCore<T>;

    /// Called before the node starts, before any parent has been attached.
    fn on_will_start(&self) {}

    /// Called once the first observer is in place.
    fn on_start(&self) {}

    /// Called after the last observer is removed.
    fn on_stop(&self) {}

    /// Called right after an external observer was added. Signals use this
    /// to hand the new observer their current value.
    fn on_added_external_observer(&self, _observer: &Observer<T>) {}
}

/// A node that also retains a current value.
pub(crate) trait SignalNode<T: Clone + 'static>: Node<T> {
    fn current(&self) -> &CurrentValue<T>;

    /// Compute the value used when the cache is empty.
    fn initial_value(&self) -> Try<T>;
}

enum Removal<T> {
    External(u64),
    Internal(Rc<dyn InternalObserver<T>>),
}

/// Base state of every node.
pub(crate) struct NodeCore<T> {
    id: NodeId,
    kind: NodeKind,
    rank: usize,
    name: RefCell<Option<String>>,
    external: RefCell<Vec<(u64, Observer<T>)>>,
    internal: RefCell<Vec<Rc<dyn InternalObserver<T>>>>,
    next_external_key: Cell<u64>,

    /// Depth of in-progress notifications. Removals are deferred while > 0.
    notifying: Cell<u32>,
    pending_removals: RefCell<Vec<Removal<T>>>,

    start_index: Cell<u32>,
}

impl<T: 'static> NodeCore<T> {
    pub(crate) fn new(kind: NodeKind, rank: usize) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            rank,
            name: RefCell::new(None),
            external: RefCell::new(Vec::new()),
            internal: RefCell::new(Vec::new()),
            next_external_key: Cell::new(0),
            notifying: Cell::new(0),
            pending_removals: RefCell::new(Vec::new()),
            start_index: Cell::new(0),
        }
    }

    pub(crate) fn source() -> Self {
        Self::new(NodeKind::Source, 1)
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.external.borrow().len() + self.internal.borrow().len()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.observer_count() > 0
    }

    /// How many times this node has started. Zero before the first start.
    pub(crate) fn start_index(&self) -> u32 {
        self.start_index.get()
    }

    pub(crate) fn display_name(&self) -> String {
        self.name
            .borrow()
            .clone()
            .unwrap_or_else(|| format!("{}@{}", self.kind.label(), self.id.0))
    }

    pub(crate) fn set_display_name(&self, name: impl Into<String>) {
        *self.name.borrow_mut() = Some(name.into());
    }
}

impl<T> Debug for NodeCore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("rank", &self.rank)
            .field("external", &self.external.borrow().len())
            .field("internal", &self.internal.borrow().len())
            .finish()
    }
}

/// Retained value of a signal node.
pub(crate) struct CurrentValue<T> {
    value: RefCell<Option<Try<T>>>,
    update_id: Cell<u64>,
}

impl<T: Clone> CurrentValue<T> {
    pub(crate) fn empty() -> Self {
        Self {
            value: RefCell::new(None),
            update_id: Cell::new(0),
        }
    }

    pub(crate) fn get(&self) -> Option<Try<T>> {
        self.value.borrow().clone()
    }

    /// Store a new value under a fresh update id.
    pub(crate) fn set(&self, value: Try<T>) {
        *self.value.borrow_mut() = Some(value);
        self.update_id.set(next_update_id());
    }

    /// Id of the last update; 0 while empty.
    pub(crate) fn update_id(&self) -> u64 {
        self.update_id.get()
    }
}

fn next_update_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Current value of a signal, computed on first access.
pub(crate) fn try_now<T, N>(node: &N) -> Try<T>
where
    T: Clone + 'static,
    N: SignalNode<T> + ?Sized,
{
    if let Some(value) = node.current().get() {
        return value;
    }
    let value = node.initial_value();
    node.current().set(value.clone());
    value
}

/// Update id of a signal, forcing its initial value if needed.
pub(crate) fn last_update_id<T, N>(node: &N) -> u64
where
    T: Clone + 'static,
    N: SignalNode<T> + ?Sized,
{
    if node.current().update_id() == 0 {
        try_now(node);
    }
    node.current().update_id()
}

pub(crate) fn maybe_will_start<T: 'static, N: Node<T> + ?Sized>(node: &N) {
    if !node.core().is_started() {
        node.on_will_start();
    }
}

fn maybe_start<T: 'static, N: Node<T> + ?Sized>(node: &N) {
    let core = node.core();
    if core.observer_count() == 1 {
        core.start_index.set(core.start_index.get() + 1);
        tracing::debug!(node = %core.display_name(), start = core.start_index.get(), "starting");
        node.on_start();
    }
}

fn maybe_stop<T: 'static, N: Node<T> + ?Sized>(node: &N) {
    if !node.core().is_started() {
        tracing::debug!(node = %node.core().display_name(), "stopping");
        node.on_stop();
    }
}

/// Attach `observer` as a graph edge from `node`.
///
/// Derived nodes call the parent's `maybe_will_start` from their own
/// `on_will_start`, so by the time they attach in `on_start` the parent
/// has already been prepared and `should_call_will_start` is false.
pub(crate) fn add_internal_observer<T: 'static, N: Node<T> + ?Sized>(
    node: &N,
    observer: Rc<dyn InternalObserver<T>>,
    should_call_will_start: bool,
) {
    if should_call_will_start {
        maybe_will_start(node);
    }
    node.core().internal.borrow_mut().push(observer);
    maybe_start(node);
}

/// Detach a graph edge. Deferred while the node is notifying.
pub(crate) fn remove_internal_observer<T: 'static, N: Node<T> + ?Sized>(
    node: &N,
    observer: &Rc<dyn InternalObserver<T>>,
) {
    let core = node.core();
    if core.notifying.get() > 0 {
        core.pending_removals
            .borrow_mut()
            .push(Removal::Internal(observer.clone()));
        return;
    }
    let removed = {
        let mut internal = core.internal.borrow_mut();
        let before = internal.len();
        if let Some(index) = internal.iter().position(|o| same_observer(o, observer)) {
            internal.remove(index);
        }
        before != internal.len()
    };
    if removed {
        maybe_stop(node);
    }
}

/// Add an external observer owned by `owner`.
///
/// Sources that fire on start are held back until the observer is in
/// place, see [`Transaction::shared_start`].
pub(crate) fn add_external_observer<T: 'static>(
    node: &Rc<dyn Node<T>>,
    observer: Observer<T>,
    owner: &Owner,
) -> Subscription {
    Transaction::shared_start(|| {
        maybe_will_start(&**node);
        let core = node.core();
        let key = core.next_external_key.get();
        core.next_external_key.set(key + 1);
        core.external.borrow_mut().push((key, observer.clone()));

        let for_cleanup = node.clone();
        let subscription = Subscription::new(owner, move || {
            remove_external_observer(&*for_cleanup, key);
        });

        node.on_added_external_observer(&observer);
        maybe_start(&**node);
        subscription
    })
}

fn remove_external_observer<T: 'static, N: Node<T> + ?Sized>(node: &N, key: u64) {
    let core = node.core();
    if core.notifying.get() > 0 {
        core.pending_removals.borrow_mut().push(Removal::External(key));
        return;
    }
    let removed = {
        let mut external = core.external.borrow_mut();
        let before = external.len();
        external.retain(|(k, _)| *k != key);
        before != external.len()
    };
    if removed {
        maybe_stop(node);
    }
}

fn flush_pending_removals<T: 'static, N: Node<T> + ?Sized>(node: &N) {
    let core = node.core();
    if core.notifying.get() > 0 {
        return;
    }
    let removals = std::mem::take(&mut *core.pending_removals.borrow_mut());
    for removal in removals {
        match removal {
            Removal::External(key) => remove_external_observer(node, key),
            Removal::Internal(observer) => remove_internal_observer(node, &observer),
        }
    }
}

fn same_observer<T>(a: &Rc<dyn InternalObserver<T>>, b: &Rc<dyn InternalObserver<T>>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

struct Notifying<'a>(&'a Cell<u32>);

impl<'a> Notifying<'a> {
    fn enter(counter: &'a Cell<u32>) -> Self {
        counter.set(counter.get() + 1);
        Notifying(counter)
    }
}

impl Drop for Notifying<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Notify every observer of `node`: external observers first, then
/// internal ones, each in the order they were added.
///
/// Observers added during notification are not called for this value.
/// Observers removed during notification still are, and the removal takes
/// effect right after.
pub(crate) fn fire_try<T: 'static, N: Node<T> + ?Sized>(node: &N, value: &Try<T>, trx: &Transaction) {
    let core = node.core();
    let external: SmallVec<[Observer<T>; 4]> =
        core.external.borrow().iter().map(|(_, o)| o.clone()).collect();
    let internal: SmallVec<[Rc<dyn InternalObserver<T>>; 4]> =
        core.internal.borrow().iter().cloned().collect();
    {
        let _notifying = Notifying::enter(&core.notifying);
        for observer in &external {
            observer.on_try(value);
        }
        for observer in &internal {
            observer.on_try(value, trx);
        }
    }
    flush_pending_removals(node);
}

/// Store a new current value on a signal, then notify.
pub(crate) fn fire_signal<T, N>(node: &N, value: Try<T>, trx: &Transaction)
where
    T: Clone + 'static,
    N: SignalNode<T> + ?Sized,
{
    node.current().set(value.clone());
    fire_try(node, &value, trx);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf {
        core: NodeCore<i32>,
        events: RefCell<Vec<&'static str>>,
    }

    impl Node<i32> for Leaf {
        fn core(&self) -> &NodeCore<i32> {
            &self.core
        }
        fn on_will_start(&self) {
            self.events.borrow_mut().push("will start");
        }
        fn on_start(&self) {
            self.events.borrow_mut().push("start");
        }
        fn on_stop(&self) {
            self.events.borrow_mut().push("stop");
        }
    }

    fn leaf() -> Rc<Leaf> {
        Rc::new(Leaf {
            core: NodeCore::source(),
            events: RefCell::new(Vec::new()),
        })
    }

    #[test]
    fn node_ids_are_unique() {
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn start_and_stop_follow_observer_count() {
        let leaf = leaf();
        let node: Rc<dyn Node<i32>> = leaf.clone();
        let owner = Owner::new();

        let first = add_external_observer(&node, Observer::empty(), &owner);
        let second = add_external_observer(&node, Observer::empty(), &owner);
        assert_eq!(*leaf.events.borrow(), vec!["will start", "start"]);
        assert_eq!(leaf.core.observer_count(), 2);
        assert_eq!(leaf.core.start_index(), 1);

        first.kill();
        assert!(leaf.core.is_started());
        second.kill();
        assert_eq!(*leaf.events.borrow(), vec!["will start", "start", "stop"]);

        let _third = add_external_observer(&node, Observer::empty(), &owner);
        assert_eq!(leaf.core.start_index(), 2);
    }

    #[test]
    fn removal_during_notification_is_deferred() {
        let leaf = leaf();
        let node: Rc<dyn Node<i32>> = leaf.clone();
        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let own_sub: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let handle = own_sub.clone();
        let s1 = seen.clone();
        let sub = add_external_observer(
            &node,
            Observer::new(move |v: &i32| {
                s1.borrow_mut().push(("first", *v));
                if let Some(sub) = handle.borrow_mut().take() {
                    sub.kill();
                }
            }),
            &owner,
        );
        *own_sub.borrow_mut() = Some(sub);
        let s2 = seen.clone();
        add_external_observer(
            &node,
            Observer::new(move |v: &i32| s2.borrow_mut().push(("second", *v))),
            &owner,
        );

        let target = leaf.clone();
        Transaction::run(move |trx| fire_try(&*target, &Ok(1), trx));
        assert_eq!(leaf.core.observer_count(), 1);
        let target = leaf.clone();
        Transaction::run(move |trx| fire_try(&*target, &Ok(2), trx));

        assert_eq!(
            *seen.borrow(),
            vec![("first", 1), ("second", 1), ("second", 2)]
        );
    }

    #[test]
    fn display_name_defaults_to_kind_and_id() {
        let core: NodeCore<i32> = NodeCore::new(NodeKind::Merge, 3);
        assert!(core.display_name().starts_with("merge@"));
        core.set_display_name("clicks");
        assert_eq!(core.display_name(), "clicks");
        assert_eq!(core.rank(), 3);
    }

    #[test]
    fn current_value_update_ids_increase() {
        let current = CurrentValue::<i32>::empty();
        assert_eq!(current.update_id(), 0);
        current.set(Ok(1));
        let first = current.update_id();
        current.set(Ok(2));
        assert!(current.update_id() > first);
        assert_eq!(current.get(), Some(Ok(2)));
    }
}
