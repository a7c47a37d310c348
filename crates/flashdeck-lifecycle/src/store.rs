//! Observable state.
//!
//! A [`Store`] owns one value and a list of subscribers. Subscribing replays
//! the current value immediately, then delivers every later transition, in
//! subscription order. Subscribers may see the same value more than once.
//!
//! Callbacks run outside the store's locks, so a callback may read the store,
//! subscribe or unsubscribe. Transitions are expected to come from one task at
//! a time, as they do on the page's event loop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

struct Inner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Subscribers<T>>,
}

impl<T> Inner<T> {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(i, _)| *i != id);
        subscribers.entries.len() != before
    }

    fn callbacks(&self) -> Vec<Callback<T>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }
}

/// An observable value. Clones share the same value and subscribers.
pub struct Store<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Store<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    entries: Vec::new(),
                }),
            }),
        }
    }

    /// A snapshot of the current value.
    pub fn get(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a callback. It is invoked once right away with the current
    /// value, then on every transition until unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let id = {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.entries.push((id, Arc::clone(&callback)));
            id
        };

        callback(&self.get());

        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || inner.upgrade().is_some_and(|inner| inner.remove(id)))
    }

    /// Replace the value and notify every subscriber, even if it is unchanged.
    pub fn set(&self, value: T) {
        *self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value.clone();
        self.notify(&value);
    }

    /// Edit the value in place and notify every subscriber.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> T {
        let value = {
            let mut guard = self.inner.value.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard);
            guard.clone()
        };
        self.notify(&value);
        value
    }

    /// Edit the value in place; notify only if it changed. Returns whether it did.
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> bool {
        let changed = {
            let mut guard = self.inner.value.write().unwrap_or_else(PoisonError::into_inner);
            let before = guard.clone();
            f(&mut guard);
            (*guard != before).then(|| guard.clone())
        };
        match changed {
            Some(value) => {
                self.notify(&value);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    fn notify(&self, value: &T) {
        for callback in self.inner.callbacks() {
            callback(value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.inner.value.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Store").field("value", &*value).finish_non_exhaustive()
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the callback registered;
/// call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() -> bool + Send>>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() -> bool + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the callback. Idempotent; returns true only on the call that
    /// actually removed it.
    pub fn unsubscribe(&self) -> bool {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        cancel.is_some_and(|cancel| cancel())
    }

    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Several subscriptions released together.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Unsubscribe everything. Idempotent.
    pub fn unsubscribe_all(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
