//! External observers.
//!
//! An [`Observer`] is the side-effecting end of a chain. Panics in its
//! callbacks never escape into the graph: they are converted into
//! [`Error::Observer`] / [`Error::ObserverErrorHandling`] and routed to the
//! error handler or to the unhandled-error registry.

use std::fmt::Debug;
use std::rc::Rc;

use crate::error::{self, send_unhandled_error, Error, Try};

enum Callbacks<T> {
    Next(Box<dyn Fn(&T)>),
    NextAndError(Box<dyn Fn(&T)>, Box<dyn Fn(&Error)>),
    Try(Box<dyn Fn(&Try<T>)>),
}

/// Receives values from an observable.
///
/// Cloning yields another handle to the same callbacks.
pub struct Observer<T> {
    callbacks: Rc<Callbacks<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            callbacks: Rc::clone(&self.callbacks),
        }
    }
}

impl<T: 'static> Observer<T> {
    /// Observer for values only. Failures go to the unhandled-error registry.
    pub fn new<F>(on_next: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        Self {
            callbacks: Rc::new(Callbacks::Next(Box::new(on_next))),
        }
    }

    /// Observer with an error handler.
    ///
    /// A panic in `on_next` is passed to `on_error` as [`Error::Observer`].
    pub fn with_error<F, E>(on_next: F, on_error: E) -> Self
    where
        F: Fn(&T) + 'static,
        E: Fn(&Error) + 'static,
    {
        Self {
            callbacks: Rc::new(Callbacks::NextAndError(Box::new(on_next), Box::new(on_error))),
        }
    }

    /// Observer that sees successes and failures alike.
    pub fn from_try<F>(on_try: F) -> Self
    where
        F: Fn(&Try<T>) + 'static,
    {
        Self {
            callbacks: Rc::new(Callbacks::Try(Box::new(on_try))),
        }
    }

    /// Observer that ignores values. Failures still reach the registry.
    pub fn empty() -> Self {
        Self::new(|_| {})
    }

    /// Observer of `U` that converts each value before passing it on.
    pub fn contramap<U, F>(self, project: F) -> Observer<U>
    where
        U: 'static,
        F: Fn(&U) -> T + 'static,
    {
        Observer::from_try(move |value: &Try<U>| match value {
            Ok(v) => self.on_try(&Ok(project(v))),
            Err(e) => self.on_try(&Err(e.clone())),
        })
    }

    /// Deliver a value.
    pub fn on_next(&self, value: &T)
    where
        T: Clone,
    {
        self.on_try(&Ok(value.clone()));
    }

    /// Deliver a failure.
    pub fn on_error(&self, err: &Error) {
        match &*self.callbacks {
            Callbacks::Next(_) => send_unhandled_error(err.clone()),
            Callbacks::NextAndError(_, on_error) => handle_error(on_error, err.clone()),
            Callbacks::Try(on_try) => try_with_recovery(on_try, &Err(err.clone())),
        }
    }

    /// Deliver a success or a failure.
    pub fn on_try(&self, value: &Try<T>) {
        match (&*self.callbacks, value) {
            (Callbacks::Try(on_try), _) => try_with_recovery(on_try, value),
            (Callbacks::Next(on_next), Ok(v)) => {
                if let Err(err) = error::catch(|| on_next(v)) {
                    send_unhandled_error(Error::Observer(Box::new(err)));
                }
            }
            (Callbacks::NextAndError(on_next, on_error), Ok(v)) => {
                if let Err(err) = error::catch(|| on_next(v)) {
                    handle_error(on_error, Error::Observer(Box::new(err)));
                }
            }
            (_, Err(e)) => self.on_error(e),
        }
    }
}

fn handle_error(on_error: &dyn Fn(&Error), cause: Error) {
    if let Err(err) = error::catch(|| on_error(&cause)) {
        send_unhandled_error(Error::ObserverErrorHandling {
            error: Box::new(err),
            cause: Box::new(cause),
        });
    }
}

fn try_with_recovery<T>(on_try: &dyn Fn(&Try<T>), value: &Try<T>) {
    let Err(err) = error::catch(|| on_try(value)) else {
        return;
    };
    match value {
        Ok(_) => {
            let cause = Error::Observer(Box::new(err));
            let wrapped: Try<T> = Err(cause.clone());
            if let Err(again) = error::catch(|| on_try(&wrapped)) {
                send_unhandled_error(Error::ObserverErrorHandling {
                    error: Box::new(again),
                    cause: Box::new(cause),
                });
            }
        }
        Err(cause) => send_unhandled_error(Error::ObserverErrorHandling {
            error: Box::new(err),
            cause: Box::new(cause.clone()),
        }),
    }
}

impl<T> Debug for Observer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.callbacks {
            Callbacks::Next(_) => "next",
            Callbacks::NextAndError(..) => "next+error",
            Callbacks::Try(_) => "try",
        };
        f.debug_struct("Observer").field("callbacks", &kind).finish()
    }
}
