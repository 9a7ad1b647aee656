//! Observables
//!
//! This module implements the user-facing observables built on top of the
//! graph: event streams, signals, their operators and their sources.
//!
//! # Concepts
//!
//! ## Event streams
//!
//! An [`EventStream`] emits discrete events and has no current value. A new
//! observer only sees events fired after it was added.
//!
//! ## Signals
//!
//! A [`Signal`] always has a current value, which may be a failure. A new
//! observer receives the current value as soon as it is added.
//!
//! ## Sources
//!
//! [`EventBus`] and [`Var`] are fed imperatively. Custom sources wrap an
//! external producer that is set up on start and torn down on stop, and
//! [`Deferred`] bridges a result settled later, such as a spawned future.
//!
//! # Laziness
//!
//! Nothing runs until an observer is added. Adding the first observer to a
//! derived observable starts it and, recursively, its parents; removing
//! the last observer stops the chain again.

mod custom;
mod deferred;
mod operators;
mod signal;
mod sources;
mod stream;

pub use custom::{Listener, SourceConfig, SourceContext};
pub use deferred::Deferred;
pub use operators::{DebugHooks, Recovery};
pub use signal::Signal;
pub use sources::{EventBus, Var};
pub use stream::EventStream;
