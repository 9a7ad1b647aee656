//! Map and recover.

use crate::error::{self, Error, Try};

use super::single::Transform;

/// Outcome of a recovery function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery<T> {
    /// Not handled here; the failure propagates unchanged.
    Unhandled,
    /// Handled by emitting nothing.
    Skip,
    /// Handled by emitting this value instead.
    Replace(T),
}

type Project<A, B> = Box<dyn Fn(&A) -> Try<B>>;
type Recover<B> = Box<dyn Fn(&Error) -> Recovery<B>>;

/// Projects successes and optionally recovers failures.
///
/// `project` only sees parent successes and `recover` only sees parent
/// failures; a failure produced by `project` itself flows downstream.
pub(crate) struct MapTransform<A, B> {
    project: Project<A, B>,
    recover: Option<Recover<B>>,
}

impl<A: 'static, B: 'static> MapTransform<A, B> {
    pub(crate) fn new<F>(project: F) -> Self
    where
        F: Fn(&A) -> Try<B> + 'static,
    {
        Self {
            project: Box::new(project),
            recover: None,
        }
    }
}

impl<T: Clone + 'static> MapTransform<T, T> {
    pub(crate) fn recover<R>(recover: R) -> Self
    where
        R: Fn(&Error) -> Recovery<T> + 'static,
    {
        Self {
            project: Box::new(|value: &T| Ok(value.clone())),
            recover: Some(Box::new(recover)),
        }
    }
}

impl<A: 'static, B: 'static> Transform<A, B> for MapTransform<A, B> {
    fn apply(&self, value: &Try<A>) -> Option<Try<B>> {
        match value {
            Ok(v) => Some(error::catch_try(|| (self.project)(v))),
            Err(cause) => {
                let Some(recover) = &self.recover else {
                    return Some(Err(cause.clone()));
                };
                match error::catch(|| recover(cause)) {
                    Ok(Recovery::Unhandled) => Some(Err(cause.clone())),
                    Ok(Recovery::Skip) => None,
                    Ok(Recovery::Replace(replacement)) => Some(Ok(replacement)),
                    Err(err) => Some(Err(Error::ErrorHandling {
                        error: Box::new(err),
                        cause: Box::new(cause.clone()),
                    })),
                }
            }
        }
    }
}

/// Moves failures into the value channel: every input becomes a success.
pub(crate) struct LiftTry;

impl<T: Clone + 'static> Transform<T, Try<T>> for LiftTry {
    fn apply(&self, value: &Try<T>) -> Option<Try<Try<T>>> {
        Some(Ok(value.clone()))
    }
}

/// Inverse of [`LiftTry`].
pub(crate) struct ThrowFailures;

impl<T: Clone + 'static> Transform<Try<T>, T> for ThrowFailures {
    fn apply(&self, value: &Try<Try<T>>) -> Option<Try<T>> {
        Some(match value {
            Ok(inner) => inner.clone(),
            Err(err) => Err(err.clone()),
        })
    }
}
