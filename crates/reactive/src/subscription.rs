//! Subscription management for observable streams.
//!
//! `SubscriberSet` is the explicit list of active subscriber records owned by
//! a source. Delivery always works on a snapshot taken under the lock and
//! runs with no lock held, so a listener may subscribe or unsubscribe from
//! inside a notification. Each record carries an `active` flag that is
//! cleared synchronously on unsubscribe; a snapshot skips inactive records.

use crate::observable::{Listener, Notification};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// A handle to an active subscription.
///
/// Dropping the handle unsubscribes. Handles can own child handles, which
/// are released together with the parent.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
    children: Vec<Subscription>,
}

impl Subscription {
    /// Creates a subscription that runs `teardown` when released.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
            children: Vec::new(),
        }
    }

    /// Creates a subscription with nothing to release.
    pub fn empty() -> Self {
        Self {
            teardown: None,
            children: Vec::new(),
        }
    }

    /// Ties the lifetime of another subscription to this one.
    pub fn add(&mut self, child: Subscription) {
        self.children.push(child);
    }

    /// Returns this subscription with `child` attached.
    #[must_use]
    pub fn with(mut self, child: Subscription) -> Self {
        self.add(child);
        self
    }

    /// Unsubscribes now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
        for mut child in self.children.drain(..) {
            child.release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .field("children", &self.children.len())
            .finish()
    }
}

struct Subscriber<T> {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    listener: Listener<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            listener: Arc::clone(&self.listener),
        }
    }
}

/// The list of active subscribers of one source.
pub struct SubscriberSet<T> {
    subscribers: Arc<Mutex<Vec<Subscriber<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SubscriberSet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the number of active subscribers.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns true if there are no subscribers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Takes a snapshot of the current subscribers for delivery.
    pub fn snapshot(&self) -> Delivery<T> {
        Delivery {
            subscribers: self.subscribers.lock().clone(),
        }
    }

    /// Removes every subscriber, returning them for a final delivery.
    pub fn drain(&self) -> Delivery<T> {
        Delivery {
            subscribers: core::mem::take(&mut *self.subscribers.lock()),
        }
    }
}

impl<T: 'static> SubscriberSet<T> {
    /// Registers a listener.
    ///
    /// The returned subscription removes the listener when released; after
    /// it is released the listener is never invoked again, even by a
    /// delivery that already took its snapshot.
    pub fn insert(&self, listener: Listener<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.subscribers.lock().push(Subscriber {
            id,
            active: Arc::clone(&active),
            listener,
        });

        let subscribers: Weak<Mutex<Vec<Subscriber<T>>>> = Arc::downgrade(&self.subscribers);
        Subscription::new(move || {
            active.store(false, Ordering::Release);
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.lock().retain(|s| s.id != id);
            }
            tracing::trace!(subscription = id, "unsubscribed");
        })
    }
}

/// A snapshot of subscribers taken for one delivery.
pub struct Delivery<T> {
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Delivery<T> {
    /// Returns true if nobody is listening.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Returns the number of listeners in the snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers a notification to every subscriber still active.
    pub fn deliver(&self, notification: &Notification<T>) {
        for subscriber in &self.subscribers {
            if subscriber.active.load(Ordering::Acquire) {
                (subscriber.listener)(notification);
            }
        }
    }

    /// Delivers a value to every subscriber still active.
    pub fn next(&self, value: T) {
        if !self.subscribers.is_empty() {
            self.deliver(&Notification::Next(value));
        }
    }
}
