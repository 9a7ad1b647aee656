//! Merge of several streams.
//!
//! Parents may fire in the same transaction. The merged node waits in the
//! pending queue, so it fires after all of them, and every value it
//! received beyond the first is re-emitted in its own child transaction.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::error::Try;
use crate::graph::{
    add_internal_observer, fire_try, maybe_will_start, remove_internal_observer, InternalObserver,
    Node, NodeCore, NodeId, NodeKind, SyncFire, Transaction, TransactionId,
};

/// A value queued by a merge node, tagged with the index of the parent it
/// came from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Observation<T> {
    pub(crate) source: usize,
    pub(crate) value: Try<T>,
}

pub(crate) struct MergeStream<T: Clone + 'static> {
    core: NodeCore<T>,
    parents: Vec<Rc<dyn Node<T>>>,
    inputs: Vec<Rc<dyn InternalObserver<T>>>,
    pending: RefCell<VecDeque<Observation<T>>>,
    last_fired_in: Cell<Option<TransactionId>>,
    this: Weak<Self>,
}

struct MergeInput<T: Clone + 'static> {
    index: usize,
    target: Weak<MergeStream<T>>,
}

impl<T: Clone + 'static> InternalObserver<T> for MergeInput<T> {
    fn on_try(&self, value: &Try<T>, trx: &Transaction) {
        if let Some(target) = self.target.upgrade() {
            target.on_parent(self.index, value.clone(), trx);
        }
    }
}

impl<T: Clone + 'static> MergeStream<T> {
    pub(crate) fn new(parents: Vec<Rc<dyn Node<T>>>) -> Rc<Self> {
        let rank = parents.iter().map(|p| p.core().rank()).max().unwrap_or(0) + 1;
        Rc::new_cyclic(|this: &Weak<Self>| {
            let inputs = (0..parents.len())
                .map(|index| {
                    Rc::new(MergeInput {
                        index,
                        target: this.clone(),
                    }) as Rc<dyn InternalObserver<T>>
                })
                .collect();
            Self {
                core: NodeCore::new(NodeKind::Merge, rank),
                parents,
                inputs,
                pending: RefCell::new(VecDeque::new()),
                last_fired_in: Cell::new(None),
                this: this.clone(),
            }
        })
    }

    fn on_parent(&self, source: usize, value: Try<T>, trx: &Transaction) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if self.last_fired_in.get() == Some(trx.id()) {
            // Already fired in this pass; this value gets a pass of its own.
            Self::fire_later(this, value);
            return;
        }
        self.pending
            .borrow_mut()
            .push_back(Observation { source, value });
        trx.enqueue_pending(this);
    }

    fn fire_later(this: Rc<Self>, value: Try<T>) {
        Transaction::run(move |trx| {
            this.last_fired_in.set(Some(trx.id()));
            fire_try(&*this, &value, trx);
        });
    }
}

impl<T: Clone + 'static> Node<T> for MergeStream<T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn on_will_start(&self) {
        for parent in &self.parents {
            maybe_will_start(&**parent);
        }
    }

    fn on_start(&self) {
        for (parent, input) in self.parents.iter().zip(&self.inputs) {
            add_internal_observer(&**parent, input.clone(), false);
        }
    }

    fn on_stop(&self) {
        for (parent, input) in self.parents.iter().zip(&self.inputs) {
            remove_internal_observer(&**parent, input);
        }
        self.pending.borrow_mut().clear();
    }
}

impl<T: Clone + 'static> SyncFire for MergeStream<T> {
    fn node_id(&self) -> NodeId {
        self.core.id()
    }

    fn rank(&self) -> usize {
        self.core.rank()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Merge
    }

    fn sync_fire(&self, trx: &Transaction) {
        let queued = std::mem::take(&mut *self.pending.borrow_mut());
        let mut queued = queued.into_iter();
        let Some(first) = queued.next() else {
            return;
        };
        tracing::trace!(
            node = %self.core.display_name(),
            source = first.source,
            extra = queued.len(),
            "merge firing"
        );
        self.last_fired_in.set(Some(trx.id()));
        fire_try(self, &first.value, trx);

        let Some(this) = self.this.upgrade() else {
            return;
        };
        for observation in queued {
            Self::fire_later(this.clone(), observation.value);
        }
    }

    fn discard(&self, _trx: &Transaction) {
        self.pending.borrow_mut().clear();
    }
}
