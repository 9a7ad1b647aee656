//! Ownership Graph
//!
//! Tracks which cleanup callbacks are alive, independently of the
//! observable graph. Observables hand out [`Subscription`]s; whoever holds
//! the [`Owner`] decides when they die.

mod dynamic;
mod owner;

pub use dynamic::{DynamicOwner, DynamicSubscription};
pub use owner::{Owner, Subscription};
