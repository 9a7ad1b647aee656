//! Dynamic ownership.
//!
//! A [`DynamicOwner`] can be activated and deactivated repeatedly. Each
//! activation creates a fresh one-time [`Owner`] and asks every
//! [`DynamicSubscription`] to subscribe again under it; deactivation kills
//! that owner but keeps the list of dynamic subscriptions.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::owner::{Owner, Subscription};

type Activate = Box<dyn FnMut(&Owner) -> Option<Subscription>>;

/// An owner whose lifetime is a sequence of activation cycles.
#[derive(Clone)]
pub struct DynamicOwner {
    inner: Rc<DynamicOwnerInner>,
}

struct DynamicOwnerInner {
    subscriptions: RefCell<Vec<DynamicSubscription>>,
    current: RefCell<Option<Owner>>,
    activation_count: Cell<u32>,
}

impl DynamicOwner {
    /// Create an inactive dynamic owner.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DynamicOwnerInner {
                subscriptions: RefCell::new(Vec::new()),
                current: RefCell::new(None),
                activation_count: Cell::new(0),
            }),
        }
    }

    /// Create a fresh owner and activate every dynamic subscription under it.
    ///
    /// # Panics
    ///
    /// Panics if the owner is already active.
    pub fn activate(&self) {
        if self.is_active() {
            panic!("DynamicOwner is already active");
        }
        let owner = Owner::one_time();
        *self.inner.current.borrow_mut() = Some(owner.clone());
        self.inner.activation_count.set(self.inner.activation_count.get() + 1);
        tracing::debug!(
            activation = self.inner.activation_count.get(),
            "dynamic owner activating"
        );

        // Subscriptions added while this loop runs are activated on insert.
        let snapshot = self.inner.subscriptions.borrow().clone();
        for subscription in snapshot {
            if !subscription.is_killed() && self.owns_current(&owner) {
                subscription.on_activate(&owner);
            }
        }
    }

    /// Kill the current owner and every subscription it holds.
    ///
    /// # Panics
    ///
    /// Panics if the owner is not active.
    pub fn deactivate(&self) {
        let owner = match self.inner.current.borrow_mut().take() {
            Some(owner) => owner,
            None => panic!("DynamicOwner is not active"),
        };
        tracing::debug!(
            activation = self.inner.activation_count.get(),
            "dynamic owner deactivating"
        );
        let snapshot = self.inner.subscriptions.borrow().clone();
        for subscription in snapshot {
            subscription.on_deactivate();
        }
        owner.kill_subscriptions();
    }

    /// Whether an owner is currently live.
    pub fn is_active(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    /// The live owner, if active.
    pub fn current_owner(&self) -> Option<Owner> {
        self.inner.current.borrow().clone()
    }

    /// How many times this owner has been activated.
    pub fn activation_count(&self) -> u32 {
        self.inner.activation_count.get()
    }

    /// Number of dynamic subscriptions, active or not.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }

    fn owns_current(&self, owner: &Owner) -> bool {
        self.inner
            .current
            .borrow()
            .as_ref()
            .is_some_and(|current| current.ptr_eq(owner))
    }

    fn add(&self, subscription: DynamicSubscription, prepend: bool) {
        {
            let mut subscriptions = self.inner.subscriptions.borrow_mut();
            if prepend {
                subscriptions.insert(0, subscription.clone());
            } else {
                subscriptions.push(subscription.clone());
            }
        }
        if let Some(owner) = self.current_owner() {
            subscription.on_activate(&owner);
        }
    }
}

impl Default for DynamicOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for DynamicOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicOwner")
            .field("active", &self.is_active())
            .field("activation_count", &self.activation_count())
            .field("subscription_count", &self.subscription_count())
            .finish()
    }
}

impl DynamicOwnerInner {
    fn remove(&self, target: &Rc<DynamicSubscriptionInner>) {
        self.subscriptions
            .borrow_mut()
            .retain(|s| !Rc::ptr_eq(&s.inner, target));
    }
}

/// A subscription that is re-created on every activation of its
/// [`DynamicOwner`].
#[derive(Clone)]
pub struct DynamicSubscription {
    inner: Rc<DynamicSubscriptionInner>,
}

struct DynamicSubscriptionInner {
    owner: Weak<DynamicOwnerInner>,
    activate: RefCell<Activate>,
    current: RefCell<Option<Subscription>>,
    killed: Cell<bool>,
}

impl DynamicSubscription {
    /// Register `activate` with `dynamic_owner`.
    ///
    /// `activate` runs on every activation (and right away if the owner is
    /// active). The subscription it returns, if any, is killed on
    /// deactivation. With `prepend`, this subscription activates before the
    /// ones already registered.
    pub fn new<F>(dynamic_owner: &DynamicOwner, activate: F, prepend: bool) -> Self
    where
        F: FnMut(&Owner) -> Option<Subscription> + 'static,
    {
        let subscription = Self {
            inner: Rc::new(DynamicSubscriptionInner {
                owner: Rc::downgrade(&dynamic_owner.inner),
                activate: RefCell::new(Box::new(activate)),
                current: RefCell::new(None),
                killed: Cell::new(false),
            }),
        };
        dynamic_owner.add(subscription.clone(), prepend);
        subscription
    }

    /// Register a callback that runs on every activation. Whatever it
    /// subscribes under the given owner is cleaned up on deactivation.
    pub fn callback<F>(dynamic_owner: &DynamicOwner, mut activate: F) -> Self
    where
        F: FnMut(&Owner) + 'static,
    {
        Self::new(
            dynamic_owner,
            move |owner| {
                activate(owner);
                None
            },
            false,
        )
    }

    /// Permanently remove this subscription from its dynamic owner, killing
    /// the live underlying subscription if there is one.
    pub fn kill(&self) {
        if self.inner.killed.replace(true) {
            return;
        }
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.remove(&self.inner);
        }
        self.on_deactivate();
    }

    /// Whether [`kill`](Self::kill) was called.
    pub fn is_killed(&self) -> bool {
        self.inner.killed.get()
    }

    /// Whether an underlying subscription is currently live.
    pub fn is_active(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    fn on_activate(&self, owner: &Owner) {
        let subscription = {
            let mut activate = self.inner.activate.borrow_mut();
            (*activate)(owner)
        };
        *self.inner.current.borrow_mut() = subscription;
    }

    fn on_deactivate(&self) {
        let current = self.inner.current.borrow_mut().take();
        if let Some(subscription) = current {
            if !subscription.is_killed() {
                subscription.kill();
            }
        }
    }
}

impl Debug for DynamicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSubscription")
            .field("active", &self.is_active())
            .field("killed", &self.is_killed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(
        dynamic_owner: &DynamicOwner,
        log: &Rc<RefCell<Vec<String>>>,
        name: &'static str,
    ) -> DynamicSubscription {
        let log = log.clone();
        DynamicSubscription::new(
            dynamic_owner,
            move |owner| {
                log.borrow_mut().push(format!("{name}+"));
                let log = log.clone();
                Some(Subscription::new(owner, move || {
                    log.borrow_mut().push(format!("{name}-"))
                }))
            },
            false,
        )
    }

    #[test]
    fn activation_cycles_reactivate_each_subscription_once() {
        let dynamic_owner = DynamicOwner::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = tracked(&dynamic_owner, &log, "a");
        let _b = tracked(&dynamic_owner, &log, "b");
        assert!(log.borrow().is_empty());

        dynamic_owner.activate();
        assert!(a.is_active());
        dynamic_owner.deactivate();
        assert!(!a.is_active());
        dynamic_owner.activate();
        dynamic_owner.deactivate();

        assert_eq!(
            *log.borrow(),
            vec!["a+", "b+", "a-", "b-", "a+", "b+", "a-", "b-"]
        );
        assert_eq!(dynamic_owner.activation_count(), 2);
    }

    #[test]
    fn adding_while_active_activates_immediately() {
        let dynamic_owner = DynamicOwner::new();
        dynamic_owner.activate();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sub = tracked(&dynamic_owner, &log, "late");
        assert_eq!(*log.borrow(), vec!["late+"]);
        assert!(sub.is_active());
    }

    #[test]
    fn prepend_activates_first() {
        let dynamic_owner = DynamicOwner::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        tracked(&dynamic_owner, &log, "a");
        let prepend_log = log.clone();
        DynamicSubscription::new(
            &dynamic_owner,
            move |_| {
                prepend_log.borrow_mut().push("first".to_string());
                None
            },
            true,
        );
        dynamic_owner.activate();
        assert_eq!(*log.borrow(), vec!["first", "a+"]);
    }

    #[test]
    fn killed_dynamic_subscription_is_gone_for_good() {
        let dynamic_owner = DynamicOwner::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sub = tracked(&dynamic_owner, &log, "a");
        dynamic_owner.activate();
        sub.kill();
        assert_eq!(*log.borrow(), vec!["a+", "a-"]);
        assert_eq!(dynamic_owner.subscription_count(), 0);

        dynamic_owner.deactivate();
        dynamic_owner.activate();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn callback_subscriptions_are_cleaned_by_owner() {
        let dynamic_owner = DynamicOwner::new();
        let cleaned = Rc::new(Cell::new(0));
        let handle = cleaned.clone();
        DynamicSubscription::callback(&dynamic_owner, move |owner| {
            let handle = handle.clone();
            Subscription::new(owner, move || handle.set(handle.get() + 1));
        });
        dynamic_owner.activate();
        dynamic_owner.deactivate();
        dynamic_owner.activate();
        dynamic_owner.deactivate();
        assert_eq!(cleaned.get(), 2);
    }

    #[test]
    #[should_panic(expected = "already active")]
    fn double_activation_panics() {
        let dynamic_owner = DynamicOwner::new();
        dynamic_owner.activate();
        dynamic_owner.activate();
    }

    #[test]
    #[should_panic(expected = "not active")]
    fn deactivating_inactive_owner_panics() {
        DynamicOwner::new().deactivate();
    }
}
