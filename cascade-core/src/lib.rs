//! Cascade Core
//!
//! This crate provides the propagation engine for the Cascade reactive
//! observables library. It implements:
//!
//! - Event streams and signals with lazy start/stop
//! - A transaction scheduler that propagates changes glitch-free
//! - Merge, combine and switch operators
//! - Ownership-based subscription lifetimes
//! - An explicit error channel carried alongside values
//!
//! The engine is single-threaded: observables are `!Send` and all
//! scheduler state is per thread.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: nodes, observers and the transaction scheduler
//! - `reactive`: event streams, signals, operators and sources
//! - `ownership`: owners, subscriptions and dynamic owners
//! - `error`: the error type and the unhandled-error registry
//! - `config`: per-thread scheduler configuration
//!
//! # Example
//!
//! ```rust
//! use cascade_core::ownership::Owner;
//! use cascade_core::reactive::{EventBus, Var};
//!
//! let clicks = EventBus::new();
//! let factor = Var::new(2);
//!
//! let scaled = clicks
//!     .stream()
//!     .map(|x: &i32| x * 2)
//!     .combine_with(&factor.signal().changes(), |x, f| x * f);
//!
//! let owner = Owner::new();
//! scaled.foreach(&owner, |v| println!("scaled: {v}"));
//!
//! clicks.emit(4);
//! factor.set(2); // prints "scaled: 16"
//!
//! owner.kill_subscriptions();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod ownership;
pub mod reactive;

pub use config::SchedulerConfig;
pub use error::{Error, Try};
pub use graph::{Observer, Transaction};
pub use ownership::{DynamicOwner, DynamicSubscription, Owner, Subscription};
pub use reactive::{Deferred, EventBus, EventStream, Recovery, Signal, Var};
