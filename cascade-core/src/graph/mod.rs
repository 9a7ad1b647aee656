//! Observable Graph
//!
//! This module implements the machinery every observable shares: node
//! state and lifecycle, external observers, and the transaction scheduler
//! that orders propagation.
//!
//! # Overview
//!
//! The graph is a DAG where:
//!
//! - Nodes are sources (buses, vars, custom sources) or derived operators
//! - Edges are internal observers: a started child is registered on each
//!   of its parents
//!
//! # Design Decisions
//!
//! 1. Every node has a rank fixed at construction: 1 for sources, one more
//!    than its highest parent otherwise. Draining pending nodes by rank is
//!    what keeps a pass glitch-free.
//!
//! 2. Single-parent operators fire synchronously as their parent notifies
//!    them. Only nodes with several parents wait in the pending queue, which
//!    is what limits them to one firing per transaction.
//!
//! 3. Edges exist only while the child is started, so an unobserved chain
//!    holds no references from parents to children and is freed as soon as
//!    its handles are dropped.

mod node;
mod observer;
mod scheduler;

pub use node::{NodeId, NodeKind};
pub use observer::Observer;
pub use scheduler::{Transaction, TransactionId};

pub(crate) use node::{
    add_external_observer, add_internal_observer, fire_signal, fire_try, last_update_id,
    maybe_will_start, remove_internal_observer, try_now, CurrentValue, InternalObserver, Node,
    NodeCore, SignalNode,
};
pub(crate) use scheduler::SyncFire;
