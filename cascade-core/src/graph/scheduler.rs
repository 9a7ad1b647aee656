//! Transaction Scheduler
//!
//! A transaction is one synchronous propagation pass. It runs its code,
//! which fires values into source nodes, and then drains its queue of
//! pending nodes (multi-parent nodes that received input during this pass)
//! in ascending rank order.
//!
//! # Algorithm
//!
//! 1. A transaction created while no other transaction runs is pushed onto
//!    the stack and runs to completion immediately.
//! 2. A transaction created while another one runs is queued as a child of
//!    the transaction on top of the stack.
//! 3. When a transaction completes, its first queued child is pushed and
//!    run. When it has no more children it is popped, and its parent's next
//!    child runs, and so on up the stack. Siblings therefore run in
//!    creation order, after their parent.
//! 4. While observers are being attached (the shared-start level is above
//!    zero), new transactions are held back and scheduled in creation order
//!    once the outermost attach completes.
//!
//! Node ranks never change after construction, so the pending queue is a
//! plain min-heap keyed by `(rank, arrival)`.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::node::{NodeId, NodeKind};
use crate::config::SchedulerConfig;
use crate::error::{self, Error};

/// Unique identifier for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A node that defers its firing to the end of the transaction.
pub(crate) trait SyncFire {
    fn node_id(&self) -> NodeId;
    fn rank(&self) -> usize;
    fn kind(&self) -> NodeKind;
    fn sync_fire(&self, trx: &Transaction);

    /// Drop whatever was queued for `trx`. Called instead of `sync_fire`
    /// when the transaction fails before reaching this node.
    fn discard(&self, _trx: &Transaction) {}
}

struct PendingEntry {
    rank: usize,
    arrival: u64,
    node: Rc<dyn SyncFire>,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.arrival == other.arrival
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    // Reversed: BinaryHeap is a max-heap and we drain lowest rank first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}

#[derive(Default)]
struct PendingQueue {
    heap: BinaryHeap<PendingEntry>,
    queued: HashSet<NodeId>,
    arrivals: u64,
}

type Code = Box<dyn FnOnce(&Transaction)>;

/// A unit of synchronous propagation.
///
/// Cloning yields another handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionInner>,
}

struct TransactionInner {
    id: TransactionId,
    code: RefCell<Option<Code>>,
    pending: RefCell<PendingQueue>,
}

struct SchedulerState {
    stack: Vec<Transaction>,
    children: IndexMap<TransactionId, VecDeque<Transaction>>,
    deferred: Vec<Transaction>,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState {
        stack: Vec::new(),
        children: IndexMap::new(),
        deferred: Vec::new(),
    });
    static START_LEVEL: Cell<usize> = const { Cell::new(0) };
}

enum Scheduled {
    RunNow,
    Queued,
    Deferred,
    TooDeep(usize),
}

impl Transaction {
    /// Create a transaction running `code` and schedule it.
    ///
    /// If no transaction is running on this thread, `code` runs before this
    /// call returns. Otherwise it runs after the current transaction (and
    /// the siblings queued before it) complete.
    pub fn run<F>(code: F)
    where
        F: FnOnce(&Transaction) + 'static,
    {
        let trx = Transaction {
            inner: Rc::new(TransactionInner {
                id: TransactionId::new(),
                code: RefCell::new(Some(Box::new(code))),
                pending: RefCell::new(PendingQueue::default()),
            }),
        };
        schedule(trx);
    }

    /// Run `f` while holding back new transactions.
    ///
    /// Used while attaching observers: a source that fires as soon as it
    /// starts must not fire before every observer in the same attach is in
    /// place. Nested calls only release transactions when the outermost
    /// call returns.
    pub fn shared_start<R>(f: impl FnOnce() -> R) -> R {
        let result = {
            let _level = StartLevel::enter();
            f()
        };
        if START_LEVEL.with(Cell::get) == 0 {
            let deferred = STATE.with(|state| std::mem::take(&mut state.borrow_mut().deferred));
            for trx in deferred {
                schedule(trx);
            }
        }
        result
    }

    /// The unique id of this transaction.
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Whether any transaction is currently running on this thread.
    pub fn is_running() -> bool {
        STATE.with(|state| !state.borrow().stack.is_empty())
    }

    /// Number of transactions on this thread's stack.
    pub fn current_depth() -> usize {
        STATE.with(|state| state.borrow().stack.len())
    }

    /// Queue `node` to fire once the current pass reaches its rank.
    /// Enqueuing a node that is already pending is a no-op.
    pub(crate) fn enqueue_pending(&self, node: Rc<dyn SyncFire>) {
        let mut pending = self.inner.pending.borrow_mut();
        if !pending.queued.insert(node.node_id()) {
            return;
        }
        pending.arrivals += 1;
        let entry = PendingEntry {
            rank: node.rank(),
            arrival: pending.arrivals,
            node,
        };
        pending.heap.push(entry);
    }

    #[cfg(test)]
    pub(crate) fn contains_pending(&self, id: NodeId) -> bool {
        self.inner.pending.borrow().queued.contains(&id)
    }

    fn ptr_eq(&self, other: &Transaction) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the code and drain pending nodes. Never unwinds, except when an
    /// unhandled-error callback itself panics.
    fn execute(&self) {
        let code = self.inner.code.borrow_mut().take();
        let Some(code) = code else {
            panic!("Transaction {} has already been executed", self.inner.id.0);
        };
        tracing::trace!(trx = self.inner.id.0, "running transaction");

        let outcome = error::catch(|| {
            code(self);
            self.resolve_pending();
        });
        if let Err(err) = outcome {
            let leftover = self.discard_pending();
            tracing::trace!(trx = self.inner.id.0, leftover, "transaction failed");
            error::send_unhandled_error(Error::TransactionFailed(Box::new(err)));
        }
    }

    /// Empty the pending queue, letting each node drop what it queued.
    fn discard_pending(&self) -> usize {
        let entries = {
            let mut pending = self.inner.pending.borrow_mut();
            pending.queued.clear();
            std::mem::take(&mut pending.heap).into_vec()
        };
        for entry in &entries {
            entry.node.discard(self);
        }
        entries.len()
    }

    fn resolve_pending(&self) {
        loop {
            let next = {
                let mut pending = self.inner.pending.borrow_mut();
                let entry = pending.heap.pop();
                if let Some(entry) = &entry {
                    pending.queued.remove(&entry.node.node_id());
                }
                entry
            };
            let Some(entry) = next else { break };
            tracing::trace!(rank = entry.rank, kind = ?entry.node.kind(), "firing pending node");
            entry.node.sync_fire(self);
        }
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("pending", &self.inner.pending.borrow().heap.len())
            .finish()
    }
}

struct StartLevel;

impl StartLevel {
    fn enter() -> Self {
        START_LEVEL.with(|level| level.set(level.get() + 1));
        StartLevel
    }
}

impl Drop for StartLevel {
    fn drop(&mut self) {
        START_LEVEL.with(|level| level.set(level.get().saturating_sub(1)));
    }
}

fn schedule(trx: Transaction) {
    let max_depth = SchedulerConfig::current().max_depth;
    let decision = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if START_LEVEL.with(Cell::get) > 0 {
            state.deferred.push(trx.clone());
            return Scheduled::Deferred;
        }
        let Some(parent) = state.stack.last().map(Transaction::id) else {
            state.stack.push(trx.clone());
            return Scheduled::RunNow;
        };
        if state.stack.len() + 1 > max_depth {
            return Scheduled::TooDeep(max_depth);
        }
        state.children.entry(parent).or_default().push_back(trx.clone());
        Scheduled::Queued
    });

    match decision {
        Scheduled::RunNow => run_from(trx),
        Scheduled::Queued => {
            tracing::trace!(trx = trx.id().0, "queued child transaction");
        }
        Scheduled::Deferred => {
            tracing::trace!(trx = trx.id().0, "deferred transaction until start completes");
        }
        Scheduled::TooDeep(max_depth) => {
            error::send_unhandled_error(Error::TransactionDepthExceeded(max_depth));
        }
    }
}

/// Run `first` (already on the stack) and then every transaction queued
/// beneath it, depth first.
fn run_from(first: Transaction) {
    let mut guard = UnwindGuard { armed: true };
    let mut next = Some(first);
    while let Some(trx) = next {
        trx.execute();
        next = complete(&trx);
    }
    guard.armed = false;
}

/// Resets the thread's stack if a fatal panic unwinds out of
/// [`run_from`], so later transactions run at the top level again.
struct UnwindGuard {
    armed: bool,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let abandoned = STATE.with(|state| {
            let Ok(mut state) = state.try_borrow_mut() else {
                return Vec::new();
            };
            state.children.clear();
            std::mem::take(&mut state.stack)
        });
        for trx in &abandoned {
            trx.discard_pending();
        }
        tracing::error!(abandoned = abandoned.len(), "transaction stack unwound by a fatal panic");
    }
}

/// Finish `trx` and return the next transaction to run, already pushed.
fn complete(trx: &Transaction) -> Option<Transaction> {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        match state.stack.last() {
            Some(top) if top.ptr_eq(trx) => {}
            top => panic!(
                "Transaction mismatch: completing {:?} but the stack top is {:?}",
                trx.id(),
                top.map(Transaction::id)
            ),
        }

        loop {
            let current = state.stack.last()?.id();
            let child = state
                .children
                .get_mut(&current)
                .and_then(VecDeque::pop_front);
            if let Some(child) = child {
                state.stack.push(child.clone());
                return Some(child);
            }
            state.children.shift_remove(&current);
            state.stack.pop();
        }
    })
}
