//! Error Channel
//!
//! Values travel through the graph as `Try<T>`, never as unwinding panics.
//! A panic is only caught at the narrow seams where user code runs
//! (projections, combinators, observer callbacks, recovery handlers, debug
//! hooks, source start hooks and transaction bodies) and is converted there
//! into the matching [`Error`] variant.
//!
//! Failures that nothing downstream recovers end up in the unhandled-error
//! registry, see [`send_unhandled_error`].

mod unhandled;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub use unhandled::{
    register_console_logger, register_unhandled_error_callback, send_unhandled_error,
    unregister_console_logger, unregister_unhandled_error_callback, CallbackId, CallbackPanicked,
};

/// The result type carried by every node in the graph.
pub type Try<T> = Result<T, Error>;

/// Errors produced by the propagation engine.
///
/// `Error` is cheap to clone: a single failure is usually delivered to
/// several observers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A failure raised by user code, e.g. from `try_map` or `EventBus::emit_try`.
    #[error("{0}")]
    Failed(Arc<str>),

    /// A panic caught at a user-code seam.
    #[error("panicked: {0}")]
    Panicked(Arc<str>),

    /// An external observer's callback panicked.
    #[error("observer error: {0}")]
    Observer(Box<Error>),

    /// An observer's own error handler panicked while handling `cause`.
    #[error("observer error handler failed with {error} while handling {cause}")]
    ObserverErrorHandling { error: Box<Error>, cause: Box<Error> },

    /// An operator's recovery function panicked while handling `cause`.
    #[error("error handler failed with {error} while handling {cause}")]
    ErrorHandling { error: Box<Error>, cause: Box<Error> },

    /// Several parents of a combine node held failures at once.
    #[error("combined error: {}", format_combined(.0))]
    Combined(Vec<(usize, Error)>),

    /// A debug hook panicked.
    #[error("debug hook error: {0}")]
    Debug(Box<Error>),

    /// A transaction body panicked.
    #[error("transaction failed: {0}")]
    TransactionFailed(Box<Error>),

    /// The transaction stack grew past the configured maximum depth.
    #[error("transaction depth exceeded the maximum of {0}")]
    TransactionDepthExceeded(usize),
}

impl Error {
    /// Create a user failure from any displayable message.
    pub fn failed(message: impl fmt::Display) -> Self {
        Error::Failed(Arc::from(message.to_string()))
    }

    /// Convert a caught panic payload into an [`Error::Panicked`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Error::Panicked(Arc::from(message))
    }

    /// Indices of the failing parents, for `Combined` errors.
    pub fn combined_indices(&self) -> Vec<usize> {
        match self {
            Error::Combined(errors) => errors.iter().map(|(i, _)| *i).collect(),
            _ => Vec::new(),
        }
    }
}

fn format_combined(errors: &[(usize, Error)]) -> String {
    errors
        .iter()
        .map(|(index, error)| format!("#{index}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run user code, converting a panic into an [`Error::Panicked`].
///
/// A [`CallbackPanicked`] payload is re-raised, not converted.
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Try<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        if payload.is::<CallbackPanicked>() {
            panic::resume_unwind(payload);
        }
        Error::from_panic(payload)
    })
}

/// Like [`catch`], for user code that already returns a `Try`.
pub(crate) fn catch_try<R>(f: impl FnOnce() -> Try<R>) -> Try<R> {
    catch(f).and_then(|result| result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_converts_panics() {
        let result: Try<i32> = catch(|| panic!("boom"));
        assert_eq!(result, Err(Error::Panicked(Arc::from("boom"))));

        let formatted: Try<i32> = catch(|| panic!("code {}", 7));
        assert_eq!(formatted, Err(Error::Panicked(Arc::from("code 7"))));
    }

    #[test]
    fn catch_try_flattens() {
        assert_eq!(catch_try(|| Ok::<_, Error>(3)), Ok(3));
        let failed: Try<i32> = catch_try(|| Err(Error::failed("nope")));
        assert_eq!(failed, Err(Error::failed("nope")));
    }

    #[test]
    fn combined_error_lists_every_parent() {
        let err = Error::Combined(vec![(0, Error::failed("a")), (2, Error::failed("c"))]);
        assert_eq!(err.to_string(), "combined error: #0: a; #2: c");
        assert_eq!(err.combined_indices(), vec![0, 2]);
    }
}
