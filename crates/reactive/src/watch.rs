//! Per-key watch registry.
//!
//! Maps each watched key to its subscribers and the latest value delivered
//! for it. An entry is created by the first watcher of a key and removed
//! synchronously when its last watcher unsubscribes.

use crate::subscription::{Delivery, SubscriberSet, Subscription};
use crate::observable::Listener;
use cachet_core::{Change, ChangeReason, ChangeSet};
use core::hash::Hash;
use hashbrown::HashMap;

struct WatchEntry<K, V> {
    subscribers: SubscriberSet<Change<K, V>>,
    latest: Option<V>,
}

pub(crate) struct Watchers<K, V> {
    entries: HashMap<K, WatchEntry<K, V>>,
}

impl<K, V> Default for Watchers<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> Watchers<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    /// Number of watchers of a key.
    pub(crate) fn count(&self, key: &K) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.subscribers.len())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a watcher. `current` seeds a new entry; returns the
    /// registration and the latest value known for the key.
    pub(crate) fn insert(&mut self, key: K, current: Option<V>, listener: Listener<Change<K, V>>) -> (Subscription, Option<V>) {
        let entry = self.entries.entry(key).or_insert_with(|| WatchEntry {
            subscribers: SubscriberSet::new(),
            latest: current,
        });
        (entry.subscribers.insert(listener), entry.latest.clone())
    }

    /// Releases a registration. Returns true if it was the last watcher of
    /// the key and the entry was torn down.
    pub(crate) fn release(&mut self, key: &K, registration: Subscription) -> bool {
        registration.unsubscribe();
        let empty = self.entries.get(key).is_some_and(|entry| entry.subscribers.is_empty());
        if empty {
            self.entries.remove(key);
        }
        empty
    }

    /// Records the changes of a batch and returns the deliveries to make.
    pub(crate) fn collect(&mut self, changes: &ChangeSet<K, V>) -> Vec<(Delivery<Change<K, V>>, Change<K, V>)> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let mut deliveries = Vec::new();
        for change in changes {
            if let Some(entry) = self.entries.get_mut(change.key()) {
                entry.latest = match change.reason() {
                    ChangeReason::Remove => None,
                    _ => Some(change.current().clone()),
                };
                deliveries.push((entry.subscribers.snapshot(), change.clone()));
            }
        }
        deliveries
    }

    /// Removes every entry, returning their subscribers for a final delivery.
    pub(crate) fn drain(&mut self) -> Vec<Delivery<Change<K, V>>> {
        self.entries.drain().map(|(_, entry)| entry.subscribers.drain()).collect()
    }
}
