//! Change-aware keyed store.
//!
//! `ChangeAwareStore` maps keys to values and records the net effect of every
//! mutation since the last capture. Changes to the same key within one
//! capture window are coalesced, so the captured `ChangeSet` equals what a
//! before/after diff of the store would show:
//!
//! | pending      | operation          | pending after                  |
//! |--------------|--------------------|--------------------------------|
//! | Add          | update             | Add (new value)                |
//! | Add          | remove             | nothing                        |
//! | Update(o)    | update back to `o` | nothing                        |
//! | Update(o)    | remove             | Remove(o)                      |
//! | Remove(o)    | add `n != o`       | Update(n, o)                   |
//! | Remove(o)    | add `o`            | nothing                        |
//! | Refresh      | update / remove    | Update / Remove                |
//! | Add / Update | refresh            | unchanged                      |

use cachet_core::{Change, ChangeReason, ChangeSet};
use core::hash::Hash;
use hashbrown::HashMap;
use std::sync::Arc;

/// Equality policy deciding whether an update is a no-op.
pub type Equality<V> = Arc<dyn Fn(&V, &V) -> bool + Send + Sync>;

/// Returns the default equality policy (`PartialEq`).
pub fn default_equality<V: PartialEq + 'static>() -> Equality<V> {
    Arc::new(|a: &V, b: &V| a == b)
}

/// A keyed store that tracks pending changes.
#[derive(Clone)]
pub struct ChangeAwareStore<K, V> {
    /// Current values by key
    data: HashMap<K, V>,
    /// Net change per key, in first-touched order; `None` marks a change that
    /// cancelled out
    pending: Vec<Option<Change<K, V>>>,
    /// Key -> slot in `pending`
    pending_index: HashMap<K, usize>,
    equality: Equality<V>,
}

impl<K, V> core::fmt::Debug for ChangeAwareStore<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChangeAwareStore")
            .field("len", &self.data.len())
            .field("pending", &self.pending_index.len())
            .finish()
    }
}

impl<K, V> Default for ChangeAwareStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ChangeAwareStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq + 'static,
{
    /// Creates an empty store using `PartialEq` to detect no-op updates.
    pub fn new() -> Self {
        Self::with_equality(default_equality())
    }

    /// Creates an empty store pre-sized for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut store = Self::new();
        store.data.reserve(capacity);
        store
    }
}

impl<K, V> ChangeAwareStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty store with a custom equality policy.
    pub fn with_equality(equality: Equality<V>) -> Self {
        Self {
            data: HashMap::new(),
            pending: Vec::new(),
            pending_index: HashMap::new(),
            equality,
        }
    }

    /// Reserves room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// Looks up the current value of a key.
    #[inline]
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.data.get(key)
    }

    /// Returns true if the key is present.
    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the store has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns an iterator over the entries, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.data.iter()
    }

    /// Returns an iterator over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.data.keys()
    }

    /// Returns an iterator over the values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.data.values()
    }

    /// Returns the equality policy of this store.
    pub fn equality(&self) -> &Equality<V> {
        &self.equality
    }

    /// Returns true if changes are waiting to be captured.
    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.pending_index.is_empty()
    }

    /// Returns the number of keys with a pending net change.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending_index.len()
    }

    /// Adds the value, or replaces the value of an existing key.
    ///
    /// Replacing a value with one equal under the equality policy records
    /// nothing.
    pub fn add_or_update(&mut self, key: K, value: V) {
        let (original, refreshed) = self.origin(&key);
        self.data.insert(key.clone(), value);
        self.settle(key, original, refreshed);
    }

    /// Removes a key. Removing an absent key records nothing.
    pub fn remove(&mut self, key: &K) {
        if !self.data.contains_key(key) {
            return;
        }
        let (original, refreshed) = self.origin(key);
        self.data.remove(key);
        self.settle(key.clone(), original, refreshed);
    }

    /// Records a refresh of an existing key. Absent keys are ignored.
    ///
    /// The value is unchanged, so the equality policy is not consulted: a
    /// pending add, update or refresh already covers the key, otherwise a
    /// refresh is recorded.
    pub fn refresh(&mut self, key: &K) {
        let Some(current) = self.data.get(key) else {
            return;
        };
        // A present key can only have a pending add, update or refresh
        if self.pending_index.contains_key(key) {
            return;
        }
        let change = Change::refresh(key.clone(), current.clone());
        self.pending_index.insert(key.clone(), self.pending.len());
        self.pending.push(Some(change));
    }

    /// Removes every entry, recording one removal per entry in iteration
    /// order.
    pub fn clear(&mut self) {
        let keys: Vec<K> = self.data.keys().cloned().collect();
        for key in &keys {
            self.remove(key);
        }
    }

    /// Returns the pending changes as a change set and clears the buffer.
    ///
    /// The stored values are not affected.
    pub fn capture_changes(&mut self) -> ChangeSet<K, V> {
        self.pending_index.clear();
        self.pending.drain(..).flatten().collect()
    }

    /// Undoes every pending change and clears the buffer.
    pub fn rollback_pending(&mut self) {
        self.pending_index.clear();
        for change in self.pending.drain(..).rev().flatten() {
            match change.reason() {
                ChangeReason::Add => {
                    self.data.remove(change.key());
                }
                ChangeReason::Update => {
                    if let Some(previous) = change.previous() {
                        self.data.insert(change.key().clone(), previous.clone());
                    }
                }
                ChangeReason::Remove => {
                    let (key, value) = change.into_key_value();
                    self.data.insert(key, value);
                }
                ChangeReason::Refresh | ChangeReason::Moved => {}
            }
        }
    }

    /// Replays another store's change set onto this store.
    ///
    /// Moves carry no keyed effect unless they also changed the value.
    pub fn apply_change_set(&mut self, changes: &ChangeSet<K, V>) {
        for change in changes {
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    self.add_or_update(change.key().clone(), change.current().clone());
                }
                ChangeReason::Remove => self.remove(change.key()),
                ChangeReason::Refresh => self.refresh(change.key()),
                ChangeReason::Moved => {
                    if change.previous().is_some() {
                        self.add_or_update(change.key().clone(), change.current().clone());
                    }
                }
            }
        }
    }

    /// Returns the value of a key as of the last capture, and whether a
    /// refresh is pending for it.
    fn origin(&self, key: &K) -> (Option<V>, bool) {
        let pending = self
            .pending_index
            .get(key)
            .and_then(|&slot| self.pending[slot].as_ref());
        match pending {
            Some(change) => match change.reason() {
                ChangeReason::Add => (None, false),
                ChangeReason::Update => (change.previous().cloned(), false),
                ChangeReason::Refresh => (Some(change.current().clone()), true),
                ChangeReason::Remove | ChangeReason::Moved => (Some(change.current().clone()), false),
            },
            None => (self.data.get(key).cloned(), false),
        }
    }

    /// Recomputes the net pending change of a key from its original value.
    fn settle(&mut self, key: K, original: Option<V>, refreshed: bool) {
        let net = match (original, self.data.get(&key)) {
            (None, None) => None,
            (None, Some(now)) => Some(Change::add(key.clone(), now.clone())),
            (Some(original), None) => Some(Change::remove(key.clone(), original)),
            (Some(original), Some(now)) => {
                if !(self.equality)(&original, now) {
                    Some(Change::update(key.clone(), now.clone(), original))
                } else if refreshed {
                    Some(Change::refresh(key.clone(), now.clone()))
                } else {
                    None
                }
            }
        };

        match (self.pending_index.get(&key).copied(), net) {
            (Some(slot), Some(change)) => self.pending[slot] = Some(change),
            (Some(slot), None) => {
                self.pending[slot] = None;
                self.pending_index.remove(&key);
            }
            (None, Some(change)) => {
                self.pending_index.insert(key, self.pending.len());
                self.pending.push(Some(change));
            }
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasons(cs: &ChangeSet<&'static str, i64>) -> Vec<(ChangeReason, &'static str)> {
        cs.iter().map(|c| (c.reason(), *c.key())).collect()
    }

    #[test]
    fn test_store_add_and_lookup() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        assert_eq!(store.lookup(&"a"), Some(&1));
        assert_eq!(store.len(), 1);

        let cs = store.capture_changes();
        assert_eq!(cs.adds(), 1);
        assert!(!store.has_pending());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_update_records_previous() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.capture_changes();

        store.add_or_update("a", 2);
        let cs = store.capture_changes();
        assert_eq!(cs.updates(), 1);
        assert_eq!(cs.as_slice()[0].previous(), Some(&1));
        assert_eq!(*cs.as_slice()[0].current(), 2);
    }

    #[test]
    fn test_store_noop_update_not_recorded() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.capture_changes();

        store.add_or_update("a", 1);
        assert!(!store.has_pending());
        assert!(store.capture_changes().is_empty());
    }

    #[test]
    fn test_store_custom_equality() {
        // Values compare equal when they agree modulo 10
        let mut store: ChangeAwareStore<&str, i64> =
            ChangeAwareStore::with_equality(Arc::new(|a: &i64, b: &i64| a % 10 == b % 10));
        store.add_or_update("a", 1);
        store.capture_changes();

        store.add_or_update("a", 11);
        assert!(store.capture_changes().is_empty());
        assert_eq!(store.lookup(&"a"), Some(&11));
    }

    #[test]
    fn test_store_add_then_remove_cancels() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("A", 1);
        store.add_or_update("B", 2);
        store.remove(&"A");

        let cs = store.capture_changes();
        assert_eq!(reasons(&cs), vec![(ChangeReason::Add, "B")]);
    }

    #[test]
    fn test_store_add_then_update_stays_add() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.add_or_update("a", 5);

        let cs = store.capture_changes();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.adds(), 1);
        assert_eq!(*cs.as_slice()[0].current(), 5);
    }

    #[test]
    fn test_store_update_then_remove_carries_original() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.capture_changes();

        store.add_or_update("a", 2);
        store.remove(&"a");
        let cs = store.capture_changes();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.removes(), 1);
        assert_eq!(*cs.as_slice()[0].current(), 1);
    }

    #[test]
    fn test_store_update_back_to_original_cancels() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.capture_changes();

        store.add_or_update("a", 2);
        store.add_or_update("a", 1);
        assert!(store.capture_changes().is_empty());
    }

    #[test]
    fn test_store_remove_then_add() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.add_or_update("b", 2);
        store.capture_changes();

        store.remove(&"a");
        store.add_or_update("a", 3);
        store.remove(&"b");
        store.add_or_update("b", 2);

        let cs = store.capture_changes();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.updates(), 1);
        assert_eq!(cs.as_slice()[0].previous(), Some(&1));
    }

    #[test]
    fn test_store_remove_absent_is_noop() {
        let mut store: ChangeAwareStore<&str, i64> = ChangeAwareStore::new();
        store.remove(&"missing");
        store.refresh(&"missing");
        assert!(!store.has_pending());
    }

    #[test]
    fn test_store_refresh() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.capture_changes();

        store.refresh(&"a");
        store.refresh(&"a");
        let cs = store.capture_changes();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.refreshes(), 1);
        assert_eq!(cs.as_slice()[0].previous(), Some(&1));
    }

    #[test]
    fn test_store_refresh_absorbed_and_replaced() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.add_or_update("b", 1);
        store.capture_changes();

        // Update followed by refresh stays an update
        store.add_or_update("a", 2);
        store.refresh(&"a");
        // Refresh followed by removal becomes a removal
        store.refresh(&"b");
        store.remove(&"b");

        let cs = store.capture_changes();
        assert_eq!(reasons(&cs), vec![(ChangeReason::Update, "a"), (ChangeReason::Remove, "b")]);
    }

    #[test]
    fn test_store_refresh_ignores_equality_policy() {
        // Replicas record every update; a refresh must stay a refresh
        let mut store: ChangeAwareStore<&str, i64> =
            ChangeAwareStore::with_equality(Arc::new(|_: &i64, _: &i64| false));
        store.add_or_update("a", 1);
        store.capture_changes();

        store.refresh(&"a");
        let cs = store.capture_changes();
        assert_eq!(reasons(&cs), vec![(ChangeReason::Refresh, "a")]);

        // Replaying a refresh keeps its reason too
        let mut replica: ChangeAwareStore<&str, i64> =
            ChangeAwareStore::with_equality(Arc::new(|_: &i64, _: &i64| false));
        replica.add_or_update("a", 1);
        replica.capture_changes();
        replica.apply_change_set(&cs);
        assert_eq!(replica.capture_changes().refreshes(), 1);
    }

    #[test]
    fn test_store_clear_records_each_entry() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.add_or_update("b", 2);
        store.add_or_update("c", 3);
        store.capture_changes();

        store.clear();
        let cs = store.capture_changes();
        assert_eq!(cs.removes(), 3);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_rollback_pending() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("a", 1);
        store.add_or_update("b", 2);
        store.capture_changes();

        store.add_or_update("a", 10);
        store.remove(&"b");
        store.add_or_update("c", 3);
        store.rollback_pending();

        assert!(!store.has_pending());
        assert_eq!(store.lookup(&"a"), Some(&1));
        assert_eq!(store.lookup(&"b"), Some(&2));
        assert_eq!(store.lookup(&"c"), None);
    }

    #[test]
    fn test_store_apply_change_set_mirrors() {
        let mut source = ChangeAwareStore::new();
        let mut mirror = ChangeAwareStore::new();

        source.add_or_update("a", 1);
        source.add_or_update("b", 2);
        mirror.apply_change_set(&source.capture_changes());

        source.add_or_update("a", 3);
        source.remove(&"b");
        mirror.apply_change_set(&source.capture_changes());

        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.lookup(&"a"), Some(&3));
    }

    // ==================== Ordering ====================

    #[test]
    fn test_store_pending_keeps_first_touched_order() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("x", 1);
        store.add_or_update("y", 2);
        store.add_or_update("x", 3);
        store.add_or_update("z", 4);

        let cs = store.capture_changes();
        let keys: Vec<_> = cs.iter().map(|c| *c.key()).collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
    }
}
