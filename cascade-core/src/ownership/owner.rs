//! Owners and subscriptions.
//!
//! A [`Subscription`] is a cleanup callback that runs exactly once, either
//! when it is killed explicitly or when its [`Owner`] kills everything it
//! owns. Killing the same subscription twice is a programming error.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique subscription IDs.
static SUBSCRIPTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_subscription_id() -> u64 {
    SUBSCRIPTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Owns subscriptions and kills them together.
///
/// Cloning an `Owner` yields another handle to the same owner. When the
/// last handle is dropped, every subscription still alive is killed.
///
/// # Example
///
/// ```rust,ignore
/// let owner = Owner::new();
/// let sub = Subscription::new(&owner, || println!("cleaned up"));
///
/// owner.kill_subscriptions(); // prints "cleaned up"
/// assert!(sub.is_killed());
/// ```
#[derive(Clone)]
pub struct Owner {
    inner: Rc<OwnerInner>,
}

struct OwnerInner {
    subscriptions: RefCell<Vec<Subscription>>,

    /// One-time owners refuse new subscriptions once killed.
    one_time: bool,

    killed: Cell<bool>,
}

impl Owner {
    /// Create a reusable owner. It can own new subscriptions after being killed.
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// Create an owner that can only be killed once.
    ///
    /// Subscriptions added after the kill are killed immediately.
    pub fn one_time() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(one_time: bool) -> Self {
        Self {
            inner: Rc::new(OwnerInner {
                subscriptions: RefCell::new(Vec::new()),
                one_time,
                killed: Cell::new(false),
            }),
        }
    }

    /// Kill every subscription this owner currently owns, in the order they
    /// were added.
    pub fn kill_subscriptions(&self) {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        tracing::debug!(count = subscriptions.len(), "owner killing subscriptions");
        self.inner.killed.set(true);
        for subscription in subscriptions {
            // A cleanup may have killed a sibling already.
            if !subscription.is_killed() {
                subscription.kill_without_owner();
            }
        }
    }

    /// Number of live subscriptions owned.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }

    /// Whether this owner has been killed at least once.
    pub fn is_killed(&self) -> bool {
        self.inner.killed.get()
    }

    fn own(&self, subscription: Subscription) {
        if self.inner.one_time && self.inner.killed.get() {
            tracing::warn!(
                subscription = subscription.inner.id,
                "one-time owner already killed, killing new subscription"
            );
            subscription.kill_without_owner();
            return;
        }
        self.inner.subscriptions.borrow_mut().push(subscription);
    }

    fn downgrade(&self) -> Weak<OwnerInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn ptr_eq(&self, other: &Owner) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owner")
            .field("one_time", &self.inner.one_time)
            .field("killed", &self.inner.killed.get())
            .field("subscription_count", &self.subscription_count())
            .finish()
    }
}

impl OwnerInner {
    fn remove(&self, id: u64) {
        // Not borrowable while `kill_subscriptions` runs cleanups: the list
        // has been taken by then, so there is nothing to remove.
        if let Ok(mut subscriptions) = self.subscriptions.try_borrow_mut() {
            subscriptions.retain(|s| s.inner.id != id);
        }
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(self.subscriptions.get_mut());
        for subscription in subscriptions {
            if !subscription.is_killed() {
                subscription.kill_without_owner();
            }
        }
    }
}

/// An exactly-once cleanup callback owned by an [`Owner`].
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

struct SubscriptionInner {
    id: u64,
    owner: Weak<OwnerInner>,
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    killed: Cell<bool>,
}

impl Subscription {
    /// Create a subscription owned by `owner`.
    pub fn new<F>(owner: &Owner, cleanup: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        let subscription = Self {
            inner: Rc::new(SubscriptionInner {
                id: next_subscription_id(),
                owner: owner.downgrade(),
                cleanup: RefCell::new(Some(Box::new(cleanup))),
                killed: Cell::new(false),
            }),
        };
        owner.own(subscription.clone());
        subscription
    }

    /// Run the cleanup now and detach from the owner.
    ///
    /// # Panics
    ///
    /// Panics if the subscription was already killed.
    pub fn kill(&self) {
        self.kill_without_owner();
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.remove(self.inner.id);
        }
    }

    /// Whether the cleanup has run.
    pub fn is_killed(&self) -> bool {
        self.inner.killed.get()
    }

    /// Whether this subscription belongs to `owner`.
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        std::ptr::eq(self.inner.owner.as_ptr(), Rc::as_ptr(&owner.inner))
    }

    fn kill_without_owner(&self) {
        if self.inner.killed.replace(true) {
            panic!("Subscription {} was already killed", self.inner.id);
        }
        let cleanup = self.inner.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("killed", &self.is_killed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl FnOnce() + 'static) {
        let count = Rc::new(Cell::new(0));
        let handle = count.clone();
        (count, move || handle.set(handle.get() + 1))
    }

    #[test]
    fn kill_runs_cleanup_once_and_detaches() {
        let owner = Owner::new();
        let (count, cleanup) = counter();
        let sub = Subscription::new(&owner, cleanup);
        assert_eq!(owner.subscription_count(), 1);
        assert!(sub.is_owned_by(&owner));

        sub.kill();
        assert_eq!(count.get(), 1);
        assert!(sub.is_killed());
        assert_eq!(owner.subscription_count(), 0);

        owner.kill_subscriptions();
        assert_eq!(count.get(), 1);
    }

    #[test]
    #[should_panic(expected = "already killed")]
    fn double_kill_panics() {
        let owner = Owner::new();
        let sub = Subscription::new(&owner, || {});
        sub.kill();
        sub.kill();
    }

    #[test]
    fn owner_kills_all_in_order() {
        let owner = Owner::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            Subscription::new(&owner, move || log.borrow_mut().push(i));
        }
        owner.kill_subscriptions();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(owner.is_killed());
    }

    #[test]
    fn cleanup_killing_sibling_is_not_a_double_kill() {
        let owner = Owner::new();
        let (count, cleanup) = counter();
        let second = Rc::new(RefCell::new(None::<Subscription>));
        let second_handle = second.clone();
        Subscription::new(&owner, move || {
            if let Some(sub) = second_handle.borrow().as_ref() {
                sub.kill();
            }
        });
        *second.borrow_mut() = Some(Subscription::new(&owner, cleanup));

        owner.kill_subscriptions();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn one_time_owner_refuses_after_kill() {
        let owner = Owner::one_time();
        owner.kill_subscriptions();

        let (count, cleanup) = counter();
        let late = Subscription::new(&owner, cleanup);
        assert!(late.is_killed());
        assert_eq!(count.get(), 1);
        assert_eq!(owner.subscription_count(), 0);
    }

    #[test]
    fn manual_owner_is_reusable() {
        let owner = Owner::new();
        owner.kill_subscriptions();
        let sub = Subscription::new(&owner, || {});
        assert!(!sub.is_killed());
        assert_eq!(owner.subscription_count(), 1);
    }

    #[test]
    fn dropping_owner_kills_subscriptions() {
        let (count, cleanup) = counter();
        let sub = {
            let owner = Owner::new();
            Subscription::new(&owner, cleanup)
        };
        assert!(sub.is_killed());
        assert_eq!(count.get(), 1);
    }
}
