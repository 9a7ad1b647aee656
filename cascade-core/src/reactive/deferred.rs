//! Deferred results.
//!
//! A [`Deferred`] is a result that something outside the graph settles
//! later: a request callback, a spawned future. Settling is one-shot; the
//! continuations registered before it run in registration order, and those
//! registered after it run immediately.

use std::cell::RefCell;
use std::fmt::Debug;
use std::future::Future;
use std::rc::Rc;

use futures_util::task::{LocalSpawn, LocalSpawnExt, SpawnError};

use crate::error::{Error, Try};

use super::{EventStream, Signal, SourceConfig};

type Continuation<T> = Box<dyn FnOnce(&Try<T>)>;

struct DeferredState<T> {
    result: Option<Try<T>>,
    continuations: Vec<Continuation<T>>,
}

/// An externally settled result.
///
/// Cloning yields another handle to the same result.
pub struct Deferred<T> {
    state: Rc<RefCell<DeferredState<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(DeferredState {
                result: None,
                continuations: Vec::new(),
            })),
        }
    }

    /// An already settled result.
    pub fn settled(result: Try<T>) -> Self {
        let deferred = Self::new();
        deferred.settle(result);
        deferred
    }

    /// Settle with the output of `future`, spawned on `spawner`.
    pub fn from_future<F, S>(future: F, spawner: &S) -> Result<Self, SpawnError>
    where
        F: Future<Output = Try<T>> + 'static,
        S: LocalSpawn + ?Sized,
    {
        let deferred = Self::new();
        let settle = deferred.clone();
        spawner.spawn_local(async move {
            settle.settle(future.await);
        })?;
        Ok(deferred)
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    /// Settle with `result`. Returns false, changing nothing, if already
    /// settled.
    pub fn settle(&self, result: Try<T>) -> bool {
        let continuations = {
            let mut state = self.state.borrow_mut();
            if state.result.is_some() {
                tracing::debug!("ignoring second settlement of a deferred result");
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.continuations)
        };
        for continuation in continuations {
            continuation(&result);
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        self.state.borrow().result.is_some()
    }

    pub fn result(&self) -> Option<Try<T>> {
        self.state.borrow().result.clone()
    }

    /// Run `f` with the result once settled, or now if it already is.
    pub fn on_settle<F>(&self, f: F)
    where
        F: FnOnce(&Try<T>) + 'static,
    {
        let settled = {
            let mut state = self.state.borrow_mut();
            match &state.result {
                Some(result) => Some(result.clone()),
                None => {
                    state.continuations.push(Box::new(f));
                    return;
                }
            }
        };
        if let Some(result) = settled {
            f(&result);
        }
    }

    /// Continuation for a successful result only.
    pub fn then<F>(&self, f: F)
    where
        F: FnOnce(&T) + 'static,
    {
        self.on_settle(move |result| {
            if let Ok(value) = result {
                f(value);
            }
        });
    }

    /// Continuation for a failed result only.
    pub fn catch<F>(&self, f: F)
    where
        F: FnOnce(&Error) + 'static,
    {
        self.on_settle(move |result| {
            if let Err(err) = result {
                f(err);
            }
        });
    }
}

impl<T> Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Deferred")
            .field("settled", &state.result.is_some())
            .field("continuations", &state.continuations.len())
            .finish()
    }
}

impl<T: Clone + 'static> EventStream<T> {
    /// Stream that emits the result of `deferred` once it settles.
    ///
    /// The result is emitted on each start (immediately if already settled)
    /// unless `emit_once` is set, in which case only the first start emits.
    /// A result that settles while the stream is stopped is not emitted
    /// until the next start.
    pub fn from_deferred(deferred: Deferred<T>, emit_once: bool) -> EventStream<T> {
        EventStream::from_custom_source(move |ctx| {
            let config = SourceConfig::new().on_start(move || {
                let ctx = ctx.clone();
                let start_index = ctx.start_index();
                deferred.on_settle(move |result| {
                    if ctx.is_started() && ctx.start_index() == start_index {
                        ctx.fire_try(result.clone());
                    }
                });
            });
            if emit_once {
                config.first_start_only()
            } else {
                config
            }
        })
    }
}

impl<T: Clone + 'static> Signal<Option<T>> {
    /// Signal that is `None` until `deferred` settles, then holds its result.
    pub fn from_deferred(deferred: Deferred<T>) -> Signal<Option<T>> {
        let initial = match deferred.result() {
            Some(result) => result.map(Some),
            None => Ok(None),
        };
        Signal::from_custom_source(initial, move |ctx| {
            SourceConfig::new().on_start(move || {
                if !matches!(ctx.current(), Some(Ok(None))) {
                    return;
                }
                let ctx = ctx.clone();
                let start_index = ctx.start_index();
                deferred.on_settle(move |result| {
                    if ctx.is_started() && ctx.start_index() == start_index {
                        ctx.fire_try(result.clone().map(Some));
                    }
                });
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::Owner;
    use futures::channel::oneshot;
    use futures::executor::LocalPool;

    #[test]
    fn settles_once_and_runs_continuations_in_order() {
        let deferred = Deferred::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        deferred.then(move |v: &i32| l1.borrow_mut().push(format!("then {v}")));
        deferred.catch(move |e| l2.borrow_mut().push(format!("catch {e}")));

        assert!(deferred.resolve(7));
        assert!(!deferred.reject(Error::failed("late")));
        deferred.on_settle(move |r| l3.borrow_mut().push(format!("after {r:?}")));

        assert_eq!(*log.borrow(), vec!["then 7", "after Ok(7)"]);
        assert_eq!(deferred.result(), Some(Ok(7)));
    }

    #[test]
    fn stream_emits_after_settling() {
        let deferred = Deferred::new();
        let stream = EventStream::from_deferred(deferred.clone(), false);
        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        stream.foreach(&owner, move |v: &&str| sink.borrow_mut().push(*v));

        assert!(seen.borrow().is_empty());
        deferred.resolve("done");
        assert_eq!(*seen.borrow(), vec!["done"]);

        owner.kill_subscriptions();
        let sink = seen.clone();
        stream.foreach(&owner, move |v: &&str| sink.borrow_mut().push(*v));
        assert_eq!(*seen.borrow(), vec!["done", "done"]);
    }

    #[test]
    fn emit_once_stream_stays_quiet_after_first_start() {
        let stream = EventStream::from_deferred(Deferred::settled(Ok(1)), true);
        let seen = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let owner = Owner::new();
            let sink = seen.clone();
            stream.foreach(&owner, move |v: &i32| sink.borrow_mut().push(*v));
        }
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn future_bridge_settles_signal() {
        let mut pool = LocalPool::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let deferred = Deferred::from_future(
            async move { rx.await.map_err(Error::failed) },
            &pool.spawner(),
        )
        .unwrap();
        let signal = Signal::from_deferred(deferred);

        let owner = Owner::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        signal.foreach(&owner, move |v: &Option<u32>| sink.borrow_mut().push(*v));

        pool.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![None]);

        tx.send(42).unwrap();
        pool.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![None, Some(42)]);
        assert_eq!(signal.now(), Some(Some(42)));
    }
}
