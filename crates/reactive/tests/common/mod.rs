//! Helpers shared by the integration tests.

#![allow(dead_code)]

use cachet_reactive::{Notification, Observable, ObservableExt, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records every notification of one subscription.
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<Notification<T>>>>,
    subscription: Option<Subscription>,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub fn attach<O: Observable<T>>(observable: &O) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = observable.subscribe_all(move |n: &Notification<T>| sink.lock().push(n.clone()));
        Self {
            seen,
            subscription: Some(subscription),
        }
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().iter().filter_map(|n| n.value().cloned()).collect()
    }

    pub fn notifications(&self) -> Vec<Notification<T>> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn last(&self) -> Option<T> {
        self.values().pop()
    }

    pub fn is_terminated(&self) -> bool {
        self.seen.lock().last().is_some_and(Notification::is_terminal)
    }

    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
