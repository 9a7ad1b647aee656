//! Combine-latest.
//!
//! Each parent writes into its own slot. Once every slot holds a value the
//! combined node is queued, and when the transaction reaches its rank the
//! combinator reads all slots at once, so a diamond fires it only once.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::error::{self, Error, Try};
use crate::graph::{
    add_internal_observer, fire_signal, fire_try, last_update_id, maybe_will_start,
    remove_internal_observer, try_now, CurrentValue, InternalObserver, Node, NodeCore, NodeId,
    NodeKind, Observer, SignalNode, SyncFire, Transaction,
};

/// Last value seen from one parent.
pub(crate) type Slot<A> = Rc<RefCell<Option<Try<A>>>>;

/// One parent of a combine node, with its value type erased.
pub(crate) trait CombineInput: 'static {
    fn rank(&self) -> usize;
    fn will_start(&self);
    fn attach(&self);
    fn detach(&self);
    fn is_ready(&self) -> bool;
    /// Pull the parent's current value into the slot if the parent is a
    /// signal that moved on. Returns whether the slot changed.
    fn refresh(&self) -> bool;
    fn clear(&self);
    fn bind(&self, target: Weak<dyn CombineTarget>);
}

pub(crate) trait CombineTarget: 'static {
    fn on_input(&self, trx: &Transaction);
}

pub(crate) struct Input<A: Clone + 'static> {
    parent: Rc<dyn Node<A>>,
    signal: Option<Rc<dyn SignalNode<A>>>,
    slot: Slot<A>,
    seen_update_id: Cell<u64>,
    target: RefCell<Option<Weak<dyn CombineTarget>>>,
    this: Weak<Self>,
}

impl<A: Clone + 'static> Input<A> {
    pub(crate) fn stream(parent: Rc<dyn Node<A>>) -> (Rc<Self>, Slot<A>) {
        Self::build(parent, None)
    }

    pub(crate) fn signal(
        parent: Rc<dyn Node<A>>,
        signal: Rc<dyn SignalNode<A>>,
    ) -> (Rc<Self>, Slot<A>) {
        Self::build(parent, Some(signal))
    }

    fn build(parent: Rc<dyn Node<A>>, signal: Option<Rc<dyn SignalNode<A>>>) -> (Rc<Self>, Slot<A>) {
        let slot: Slot<A> = Rc::new(RefCell::new(None));
        let input = Rc::new_cyclic(|this| Self {
            parent,
            signal,
            slot: slot.clone(),
            seen_update_id: Cell::new(0),
            target: RefCell::new(None),
            this: this.clone(),
        });
        (input, slot)
    }

    fn as_observer(&self) -> Option<Rc<dyn InternalObserver<A>>> {
        self.this
            .upgrade()
            .map(|this| this as Rc<dyn InternalObserver<A>>)
    }
}

impl<A: Clone + 'static> InternalObserver<A> for Input<A> {
    fn on_try(&self, value: &Try<A>, trx: &Transaction) {
        if let Some(signal) = &self.signal {
            self.seen_update_id.set(signal.current().update_id());
        }
        *self.slot.borrow_mut() = Some(value.clone());
        let target = self.target.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(target) = target {
            target.on_input(trx);
        }
    }
}

impl<A: Clone + 'static> CombineInput for Input<A> {
    fn rank(&self) -> usize {
        self.parent.core().rank()
    }

    fn will_start(&self) {
        maybe_will_start(&*self.parent);
    }

    fn attach(&self) {
        if let Some(observer) = self.as_observer() {
            add_internal_observer(&*self.parent, observer, false);
        }
    }

    fn detach(&self) {
        if let Some(observer) = self.as_observer() {
            remove_internal_observer(&*self.parent, &observer);
        }
    }

    fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    fn refresh(&self) -> bool {
        let Some(signal) = &self.signal else {
            return false;
        };
        let update_id = last_update_id(&**signal);
        if update_id == self.seen_update_id.get() {
            return false;
        }
        self.seen_update_id.set(update_id);
        *self.slot.borrow_mut() = Some(try_now(&**signal));
        true
    }

    fn clear(&self) {
        *self.slot.borrow_mut() = None;
        self.seen_update_id.set(0);
    }

    fn bind(&self, target: Weak<dyn CombineTarget>) {
        *self.target.borrow_mut() = Some(target);
    }
}

/// Read a slot for a combinator. Failures are collected into `errors`.
pub(crate) fn read_slot<A: Clone>(
    slot: &Slot<A>,
    index: usize,
    errors: &mut Vec<(usize, Error)>,
) -> Option<A> {
    match &*slot.borrow() {
        Some(Ok(value)) => Some(value.clone()),
        Some(Err(err)) => {
            errors.push((index, err.clone()));
            None
        }
        None => None,
    }
}

/// Turn the slot reads into the combinator's input, or the combined error.
pub(crate) fn combine_reads<V>(values: Option<V>, errors: Vec<(usize, Error)>) -> Try<V> {
    match values {
        Some(values) if errors.is_empty() => Ok(values),
        _ if !errors.is_empty() => Err(Error::Combined(errors)),
        _ => Err(Error::failed("combine fired before every parent had a value")),
    }
}

type Combinator<Out> = Box<dyn Fn() -> Try<Out>>;

/// Combine node. Streams and signals share it; a signal additionally keeps
/// its current value and computes it from its parents' current values.
pub(crate) struct CombineNode<Out: Clone + 'static> {
    core: NodeCore<Out>,
    inputs: SmallVec<[Rc<dyn CombineInput>; 4]>,
    combinator: Combinator<Out>,
    is_signal: bool,
    current: CurrentValue<Out>,
    this: Weak<Self>,
}

impl<Out: Clone + 'static> CombineNode<Out> {
    pub(crate) fn new<F>(inputs: Vec<Rc<dyn CombineInput>>, combinator: F, is_signal: bool) -> Rc<Self>
    where
        F: Fn() -> Try<Out> + 'static,
    {
        let rank = inputs.iter().map(|i| i.rank()).max().unwrap_or(0) + 1;
        Rc::new_cyclic(|this: &Weak<Self>| {
            let target: Weak<dyn CombineTarget> = this.clone();
            for input in &inputs {
                input.bind(target.clone());
            }
            Self {
                core: NodeCore::new(NodeKind::Combine, rank),
                inputs: inputs.into_iter().collect(),
                combinator: Box::new(combinator),
                is_signal,
                current: CurrentValue::empty(),
                this: this.clone(),
            }
        })
    }

    fn combine(&self) -> Try<Out> {
        error::catch_try(|| (self.combinator)())
    }

    fn refresh_inputs(&self) -> bool {
        // Every input must refresh, so no short-circuiting here.
        self.inputs
            .iter()
            .fold(false, |changed, input| input.refresh() || changed)
    }
}

impl<Out: Clone + 'static> CombineTarget for CombineNode<Out> {
    fn on_input(&self, trx: &Transaction) {
        if !self.inputs.iter().all(|input| input.is_ready()) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            trx.enqueue_pending(this);
        }
    }
}

impl<Out: Clone + 'static> Node<Out> for CombineNode<Out> {
    fn core(&self) -> &NodeCore<Out> {
        &self.core
    }

    fn on_will_start(&self) {
        for input in &self.inputs {
            input.will_start();
        }
        if self.is_signal && self.refresh_inputs() && self.current.update_id() != 0 {
            self.current.set(self.combine());
        }
    }

    fn on_start(&self) {
        for input in &self.inputs {
            input.attach();
        }
    }

    fn on_stop(&self) {
        for input in &self.inputs {
            input.detach();
        }
        if !self.is_signal {
            for input in &self.inputs {
                input.clear();
            }
        }
    }

    fn on_added_external_observer(&self, observer: &Observer<Out>) {
        if self.is_signal {
            observer.on_try(&try_now(self));
        }
    }
}

impl<Out: Clone + 'static> SignalNode<Out> for CombineNode<Out> {
    fn current(&self) -> &CurrentValue<Out> {
        &self.current
    }

    fn initial_value(&self) -> Try<Out> {
        self.refresh_inputs();
        self.combine()
    }
}

impl<Out: Clone + 'static> SyncFire for CombineNode<Out> {
    fn node_id(&self) -> NodeId {
        self.core.id()
    }

    fn rank(&self) -> usize {
        self.core.rank()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Combine
    }

    fn sync_fire(&self, trx: &Transaction) {
        let value = self.combine();
        if self.is_signal {
            fire_signal(self, value, trx);
        } else {
            fire_try(self, &value, trx);
        }
    }
}
