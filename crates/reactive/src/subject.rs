//! Hot multicast source.
//!
//! A `Subject` is both a sink (`next`, `error`, `complete`) and an
//! observable. It is the usual way to feed operator parameters that change
//! over time: predicates, comparers, page requests.

use crate::emitter::Emitter;
use crate::observable::{listener, Listener, Notification, Observable};
use crate::subscription::{SubscriberSet, Subscription};
use cachet_core::Error;
use parking_lot::Mutex;
use std::sync::Arc;

struct Inner<T> {
    subscribers: Arc<SubscriberSet<T>>,
    emitter: Emitter<T>,
    terminal: Mutex<Option<Notification<T>>>,
}

/// A multicast source of values.
///
/// Subscribers only see values sent after they subscribed. A subscriber
/// arriving after the subject terminated receives the terminal
/// notification immediately.
pub struct Subject<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Subject<T> {
    /// Creates a subject with no subscribers.
    pub fn new() -> Self {
        let subscribers = Arc::new(SubscriberSet::new());
        let fanout = Arc::clone(&subscribers);
        Self {
            inner: Arc::new(Inner {
                subscribers,
                emitter: Emitter::new(listener(move |notification: &Notification<T>| {
                    let delivery = if notification.is_terminal() {
                        fanout.drain()
                    } else {
                        fanout.snapshot()
                    };
                    delivery.deliver(notification);
                })),
                terminal: Mutex::new(None),
            }),
        }
    }

    /// Sends a value to every current subscriber.
    pub fn next(&self, value: T) {
        self.inner.emitter.next(value);
    }

    /// Terminates the subject with a fault.
    pub fn error(&self, error: Error) {
        self.terminate(Notification::Error(error));
    }

    /// Terminates the subject normally.
    pub fn complete(&self) {
        self.terminate(Notification::Completed);
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Returns true once the subject terminated.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminal.lock().is_some()
    }

    fn terminate(&self, notification: Notification<T>) {
        {
            let mut terminal = self.inner.terminal.lock();
            if terminal.is_some() {
                return;
            }
            *terminal = notification.terminal();
        }
        self.inner.emitter.emit(notification);
    }
}

impl<T: Send + Sync + 'static> Observable<T> for Subject<T> {
    fn subscribe(&self, listener: Listener<T>) -> Subscription {
        let terminal = self.inner.terminal.lock().as_ref().and_then(Notification::terminal);
        match terminal {
            Some(terminal) => {
                listener(&terminal);
                Subscription::empty()
            }
            None => self.inner.subscribers.insert(listener),
        }
    }
}
