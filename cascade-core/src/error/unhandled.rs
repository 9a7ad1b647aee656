//! Unhandled-error callback registry.
//!
//! Each thread that runs the engine has its own registry. It starts out
//! with a console logger that reports through `tracing`.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;

use super::Error;

/// Handle returned by [`register_unhandled_error_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback = Rc<dyn Fn(&Error)>;

/// Panic payload raised when an unhandled-error callback panics.
///
/// The engine's panic seams let it through untouched, so it unwinds all
/// the way to the caller that started propagation.
pub struct CallbackPanicked {
    payload: Box<dyn Any + Send>,
}

impl CallbackPanicked {
    /// The callback's original panic payload.
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

impl fmt::Debug for CallbackPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPanicked").finish_non_exhaustive()
    }
}

const CONSOLE_LOGGER: CallbackId = CallbackId(0);

thread_local! {
    static CALLBACKS: RefCell<IndexMap<CallbackId, Callback>> = RefCell::new(default_callbacks());
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

fn default_callbacks() -> IndexMap<CallbackId, Callback> {
    let mut callbacks: IndexMap<CallbackId, Callback> = IndexMap::new();
    callbacks.insert(CONSOLE_LOGGER, Rc::new(log_to_console));
    callbacks
}

fn log_to_console(error: &Error) {
    tracing::error!(%error, "unhandled error");
}

/// Register a callback that receives every unhandled failure on this thread.
pub fn register_unhandled_error_callback<F>(callback: F) -> CallbackId
where
    F: Fn(&Error) + 'static,
{
    let id = NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        CallbackId(id)
    });
    CALLBACKS.with(|callbacks| callbacks.borrow_mut().insert(id, Rc::new(callback)));
    id
}

/// Remove a previously registered callback. Unknown ids are ignored.
pub fn unregister_unhandled_error_callback(id: CallbackId) {
    CALLBACKS.with(|callbacks| callbacks.borrow_mut().shift_remove(&id));
}

/// Remove the default `tracing` logger.
pub fn unregister_console_logger() {
    unregister_unhandled_error_callback(CONSOLE_LOGGER);
}

/// Re-install the default `tracing` logger if it was removed.
pub fn register_console_logger() {
    CALLBACKS.with(|callbacks| {
        callbacks
            .borrow_mut()
            .entry(CONSOLE_LOGGER)
            .or_insert_with(|| Rc::new(log_to_console));
    });
}

/// Deliver an unhandled failure to every registered callback, in
/// registration order.
///
/// A callback that panics is a fatal error: the panic is re-raised after
/// logging as a [`CallbackPanicked`] payload, rather than being fed back
/// into the registry.
pub fn send_unhandled_error(error: Error) {
    let snapshot: Vec<Callback> =
        CALLBACKS.with(|callbacks| callbacks.borrow().values().cloned().collect());
    for callback in snapshot {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&error))) {
            if payload.is::<CallbackPanicked>() {
                panic::resume_unwind(payload);
            }
            tracing::error!(%error, "unhandled-error callback panicked");
            panic::resume_unwind(Box::new(CallbackPanicked { payload }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_receive_errors_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let first = seen.clone();
        let second = seen.clone();
        let a = register_unhandled_error_callback(move |e| first.borrow_mut().push(format!("a:{e}")));
        let b = register_unhandled_error_callback(move |e| second.borrow_mut().push(format!("b:{e}")));

        send_unhandled_error(Error::failed("x"));
        assert_eq!(*seen.borrow(), vec!["a:x".to_string(), "b:x".to_string()]);

        unregister_unhandled_error_callback(a);
        send_unhandled_error(Error::failed("y"));
        assert_eq!(seen.borrow().last().map(String::as_str), Some("b:y"));
        assert_eq!(seen.borrow().len(), 3);

        unregister_unhandled_error_callback(b);
    }

    #[test]
    fn panicking_callback_is_fatal() {
        let id = register_unhandled_error_callback(|_| panic!("callback exploded"));
        let outcome = panic::catch_unwind(|| send_unhandled_error(Error::failed("trigger")));
        unregister_unhandled_error_callback(id);

        let payload = outcome.expect_err("callback panic must propagate");
        let fatal = payload
            .downcast::<CallbackPanicked>()
            .expect("payload is wrapped");
        let original = fatal.into_payload();
        assert_eq!(original.downcast_ref::<&str>(), Some(&"callback exploded"));
    }

    #[test]
    fn console_logger_can_be_removed_and_restored() {
        unregister_console_logger();
        assert!(CALLBACKS.with(|c| !c.borrow().contains_key(&CONSOLE_LOGGER)));
        register_console_logger();
        register_console_logger();
        assert!(CALLBACKS.with(|c| c.borrow().contains_key(&CONSOLE_LOGGER)));
    }
}
