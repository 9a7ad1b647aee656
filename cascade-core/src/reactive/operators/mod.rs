//! Operator nodes.
//!
//! Single-parent operators fire synchronously while their parent notifies
//! them. Merge and combine have several parents and wait in the
//! transaction's pending queue. Switch nodes forward inner values in a new
//! transaction.

mod combine;
mod convert;
mod debug;
mod filter;
mod map;
mod merge;
mod single;
mod switch;

pub use debug::DebugHooks;
pub use map::Recovery;

pub(crate) use combine::{combine_reads, read_slot, CombineInput, CombineNode, Input};
pub(crate) use convert::StreamToSignal;
pub(crate) use debug::{logging_hooks, DebugTransform};
pub(crate) use filter::{CollectTransform, DropTransform};
pub(crate) use map::{LiftTry, MapTransform, ThrowFailures};
pub(crate) use merge::MergeStream;
pub(crate) use single::{Identity, SignalOp, StreamOp, Transform};
pub(crate) use switch::{SwitchSignal, SwitchStream};
