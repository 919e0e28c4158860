//! Push-based streams.
//!
//! An `Observable` delivers a sequence of `Notification`s to each listener
//! that subscribes to it: any number of `Next` values followed by at most
//! one terminal `Error` or `Completed`. Streams built by this crate are cold
//! unless documented otherwise: every subscription gets its own operator
//! state.

use crate::scheduler::{Scheduler, Task};
use crate::subscription::Subscription;
use cachet_core::Error;
use core::marker::PhantomData;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One event of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification<T> {
    /// A value.
    Next(T),
    /// The stream faulted and delivers nothing further.
    Error(Error),
    /// The stream finished normally and delivers nothing further.
    Completed,
}

impl<T> Notification<T> {
    /// Returns true for `Error` and `Completed`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }

    /// Returns the value of a `Next` notification.
    #[inline]
    pub fn value(&self) -> Option<&T> {
        match self {
            Notification::Next(value) => Some(value),
            _ => None,
        }
    }

    /// Re-types a terminal notification. Returns `None` for `Next`.
    pub fn terminal<U>(&self) -> Option<Notification<U>> {
        match self {
            Notification::Next(_) => None,
            Notification::Error(error) => Some(Notification::Error(error.clone())),
            Notification::Completed => Some(Notification::Completed),
        }
    }
}

/// Callback invoked for every notification of a subscription.
pub type Listener<T> = Arc<dyn Fn(&Notification<T>) + Send + Sync>;

/// Wraps a closure into a listener.
pub fn listener<T, F>(f: F) -> Listener<T>
where
    F: Fn(&Notification<T>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A source of notifications.
pub trait Observable<T>: Send + Sync {
    /// Registers a listener. Deliveries stop synchronously once the returned
    /// subscription is released.
    fn subscribe(&self, listener: Listener<T>) -> Subscription;
}

impl<T, O> Observable<T> for Arc<O>
where
    O: Observable<T> + ?Sized,
{
    fn subscribe(&self, listener: Listener<T>) -> Subscription {
        (**self).subscribe(listener)
    }
}

/// Convenience methods available on every observable.
pub trait ObservableExt<T>: Observable<T> {
    /// Subscribes to values only; terminal notifications are ignored.
    fn subscribe_next<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe(listener(move |notification: &Notification<T>| {
            if let Notification::Next(value) = notification {
                f(value);
            }
        }))
    }

    /// Subscribes with a closure receiving every notification.
    fn subscribe_all<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Notification<T>) + Send + Sync + 'static,
    {
        self.subscribe(listener(f))
    }

    /// Type-erases this observable.
    fn into_stream(self) -> Stream<T>
    where
        Self: Sized + 'static,
        T: 'static,
    {
        Stream::from_observable(self)
    }

    /// Maps every value with `f`.
    fn map<U, F>(self, f: F) -> Stream<U>
    where
        Self: Sized + 'static,
        T: 'static,
        U: 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Stream::create(move |downstream: Listener<U>| {
            let f = Arc::clone(&f);
            self.subscribe(listener(move |notification: &Notification<T>| match notification {
                Notification::Next(value) => downstream(&Notification::Next(f(value))),
                other => {
                    if let Some(terminal) = other.terminal() {
                        downstream(&terminal);
                    }
                }
            }))
        })
    }

    /// Delivers notifications through `scheduler`.
    ///
    /// Each subscription gets a serial delivery queue: at most one task per
    /// subscription is scheduled at a time and it drains the queue in
    /// arrival order, so a subscription never observes reordering.
    fn observe_on(self, scheduler: Arc<dyn Scheduler>) -> Stream<T>
    where
        Self: Sized + 'static,
        T: Clone + Send + Sync + 'static,
    {
        Stream::create(move |downstream: Listener<T>| {
            let queue = Arc::new(SerialQueue {
                scheduler: Arc::clone(&scheduler),
                downstream,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    scheduled: false,
                }),
                active: AtomicBool::new(true),
            });
            let upstream = {
                let queue = Arc::clone(&queue);
                self.subscribe(listener(move |notification: &Notification<T>| {
                    SerialQueue::enqueue(&queue, notification.clone());
                }))
            };
            Subscription::new(move || {
                queue.active.store(false, Ordering::Release);
                queue.state.lock().pending.clear();
            })
            .with(upstream)
        })
    }
}

impl<T, O: Observable<T> + ?Sized> ObservableExt<T> for O {}

struct QueueState<T> {
    pending: VecDeque<Notification<T>>,
    scheduled: bool,
}

struct SerialQueue<T> {
    scheduler: Arc<dyn Scheduler>,
    downstream: Listener<T>,
    state: Mutex<QueueState<T>>,
    active: AtomicBool,
}

impl<T: Send + Sync + 'static> SerialQueue<T> {
    fn enqueue(this: &Arc<Self>, notification: Notification<T>) {
        if !this.active.load(Ordering::Acquire) {
            return;
        }
        let schedule = {
            let mut state = this.state.lock();
            state.pending.push_back(notification);
            !core::mem::replace(&mut state.scheduled, true)
        };
        if schedule {
            let queue = Arc::clone(this);
            let task: Task = Box::new(move || queue.run());
            this.scheduler.schedule(task);
        }
    }

    fn run(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(notification) => notification,
                    None => {
                        state.scheduled = false;
                        return;
                    }
                }
            };
            if self.active.load(Ordering::Acquire) {
                (self.downstream)(&next);
            }
        }
    }
}

/// A type-erased, cloneable observable.
pub struct Stream<T>(Arc<dyn Observable<T>>);

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> core::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

struct FnObservable<T, F> {
    subscribe: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> Observable<T> for FnObservable<T, F>
where
    F: Fn(Listener<T>) -> Subscription + Send + Sync,
{
    fn subscribe(&self, listener: Listener<T>) -> Subscription {
        (self.subscribe)(listener)
    }
}

impl<T: 'static> Stream<T> {
    /// Creates a stream from a subscribe function. The function runs once
    /// per subscription.
    pub fn create<F>(subscribe: F) -> Self
    where
        F: Fn(Listener<T>) -> Subscription + Send + Sync + 'static,
    {
        Self(Arc::new(FnObservable {
            subscribe,
            _marker: PhantomData,
        }))
    }

    /// Wraps an observable.
    pub fn from_observable<O>(observable: O) -> Self
    where
        O: Observable<T> + 'static,
    {
        Self(Arc::new(observable))
    }

    /// A stream that never emits.
    pub fn never() -> Self {
        Self::create(|_| Subscription::empty())
    }

    /// A stream that faults immediately with `error`.
    pub fn fail(error: Error) -> Self {
        Self::create(move |listener: Listener<T>| {
            listener(&Notification::Error(error.clone()));
            Subscription::empty()
        })
    }
}

impl<T> Observable<T> for Stream<T> {
    fn subscribe(&self, listener: Listener<T>) -> Subscription {
        self.0.subscribe(listener)
    }
}
