//! Edit interface over a change-aware store.
//!
//! `Updater` is the only way external code mutates a store. It translates
//! high level intents (add-or-update, remove, refresh, clear) into store
//! operations. Keys are either supplied explicitly (keyed mode) or derived
//! from each value with a key selector (source mode).

use crate::store::ChangeAwareStore;
use cachet_core::{ChangeSet, Error, Result};
use core::hash::Hash;
use std::sync::Arc;

/// Derives the key of a value.
pub type KeySelector<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;

/// One high level edit intent.
#[derive(Clone, Debug, PartialEq)]
pub enum Intent<K, V> {
    /// Add or replace a value whose key comes from the key selector.
    AddOrUpdate(V),
    /// Add or replace a value under an explicit key.
    AddOrUpdateKeyed(K, V),
    /// Replace the value of an existing key; fails if the key is absent.
    Update(K, V),
    /// Remove the value whose key comes from the key selector.
    Remove(V),
    /// Remove a key.
    RemoveKey(K),
    /// Refresh the value whose key comes from the key selector.
    Refresh(V),
    /// Refresh a key.
    RefreshKey(K),
    /// Refresh every entry.
    RefreshAll,
    /// Remove every entry.
    Clear,
}

impl<K, V> Intent<K, V> {
    /// Returns true if this intent needs a key selector.
    #[inline]
    pub fn needs_key_selector(&self) -> bool {
        matches!(self, Intent::AddOrUpdate(_) | Intent::Remove(_) | Intent::Refresh(_))
    }
}

/// Batch-oriented edit handle over a store.
///
/// All operations of one edit are recorded in the store's pending buffer and
/// emitted together when the owner captures the changes.
pub struct Updater<'a, K, V> {
    store: &'a mut ChangeAwareStore<K, V>,
    key_selector: Option<&'a KeySelector<K, V>>,
}

impl<'a, K, V> Updater<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an updater in keyed mode (keys supplied by the caller).
    pub fn new(store: &'a mut ChangeAwareStore<K, V>) -> Self {
        Self {
            store,
            key_selector: None,
        }
    }

    /// Creates an updater in source mode (keys derived from values).
    pub fn with_key_selector(store: &'a mut ChangeAwareStore<K, V>, key_selector: &'a KeySelector<K, V>) -> Self {
        Self {
            store,
            key_selector: Some(key_selector),
        }
    }

    /// Derives the key of a value.
    ///
    /// Fails with an argument error when no key selector is configured.
    pub fn key_of(&self, value: &V) -> Result<K> {
        match self.key_selector {
            Some(selector) => Ok(selector(value)),
            None => Err(Error::argument(
                "a key selector is required to edit by value; use the keyed operations",
            )),
        }
    }

    /// Adds or replaces a value, deriving its key.
    pub fn add_or_update(&mut self, value: V) -> Result<()> {
        let key = self.key_of(&value)?;
        self.store.add_or_update(key, value);
        Ok(())
    }

    /// Adds or replaces a value under an explicit key.
    pub fn add_or_update_keyed(&mut self, key: K, value: V) {
        self.store.add_or_update(key, value);
    }

    /// Adds or replaces several values, deriving their keys.
    pub fn add_or_update_many<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
    {
        if self.key_selector.is_none() {
            return Err(Error::argument("a key selector is required to edit by value"));
        }
        for value in values {
            self.add_or_update(value)?;
        }
        Ok(())
    }

    /// Replaces the value of an existing key.
    ///
    /// Fails with an invalid operation error if the key is absent, since no
    /// previous value can be resolved.
    pub fn update(&mut self, key: K, value: V) -> Result<()> {
        if !self.store.contains_key(&key) {
            return Err(Error::invalid_operation(
                "cannot update a key that is not present in the cache",
            ));
        }
        self.store.add_or_update(key, value);
        Ok(())
    }

    /// Removes a value, looking up its key first.
    pub fn remove(&mut self, value: &V) -> Result<()> {
        let key = self.key_of(value)?;
        self.store.remove(&key);
        Ok(())
    }

    /// Removes a key.
    pub fn remove_key(&mut self, key: &K) {
        self.store.remove(key);
    }

    /// Removes several keys.
    pub fn remove_keys<'k, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'k K>,
        K: 'k,
    {
        for key in keys {
            self.store.remove(key);
        }
    }

    /// Refreshes a value, looking up its key first.
    pub fn refresh(&mut self, value: &V) -> Result<()> {
        let key = self.key_of(value)?;
        self.store.refresh(&key);
        Ok(())
    }

    /// Refreshes a key.
    pub fn refresh_key(&mut self, key: &K) {
        self.store.refresh(key);
    }

    /// Refreshes every entry.
    pub fn refresh_all(&mut self) {
        let keys: Vec<K> = self.store.keys().cloned().collect();
        for key in &keys {
            self.store.refresh(key);
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Replaces the whole content with the given values.
    pub fn load<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
    {
        if self.key_selector.is_none() {
            return Err(Error::argument("a key selector is required to load values"));
        }
        self.store.clear();
        self.add_or_update_many(values)
    }

    /// Replays a change set produced by another store.
    pub fn apply_change_set(&mut self, changes: &ChangeSet<K, V>) {
        self.store.apply_change_set(changes);
    }

    /// Looks up the current value of a key, including changes of this edit.
    #[inline]
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.store.lookup(key)
    }

    /// Returns the number of entries, including changes of this edit.
    #[inline]
    pub fn count(&self) -> usize {
        self.store.len()
    }

    /// Applies one intent.
    pub fn apply_one(&mut self, intent: Intent<K, V>) -> Result<()> {
        match intent {
            Intent::AddOrUpdate(value) => self.add_or_update(value)?,
            Intent::AddOrUpdateKeyed(key, value) => self.add_or_update_keyed(key, value),
            Intent::Update(key, value) => self.update(key, value)?,
            Intent::Remove(value) => self.remove(&value)?,
            Intent::RemoveKey(key) => self.remove_key(&key),
            Intent::Refresh(value) => self.refresh(&value)?,
            Intent::RefreshKey(key) => self.refresh_key(&key),
            Intent::RefreshAll => self.refresh_all(),
            Intent::Clear => self.clear(),
        }
        Ok(())
    }

    /// Applies an ordered sequence of intents.
    ///
    /// A missing key selector is detected before anything is mutated. Other
    /// failures stop at the failing intent; the owning cache rolls the whole
    /// edit back.
    pub fn apply<I>(&mut self, intents: I) -> Result<()>
    where
        I: IntoIterator<Item = Intent<K, V>>,
    {
        let intents: Vec<Intent<K, V>> = intents.into_iter().collect();
        if self.key_selector.is_none() && intents.iter().any(Intent::needs_key_selector) {
            return Err(Error::argument("a key selector is required to edit by value"));
        }
        for intent in intents {
            self.apply_one(intent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::ChangeReason;

    #[derive(Clone, Debug, PartialEq)]
    struct Person {
        name: &'static str,
        age: u32,
    }

    fn person(name: &'static str, age: u32) -> Person {
        Person { name, age }
    }

    fn by_name() -> KeySelector<&'static str, Person> {
        Arc::new(|p: &Person| p.name)
    }

    #[test]
    fn test_updater_source_mode() {
        let mut store = ChangeAwareStore::new();
        let selector = by_name();
        let mut updater = Updater::with_key_selector(&mut store, &selector);

        updater.add_or_update(person("alice", 30)).unwrap();
        updater.add_or_update(person("bob", 40)).unwrap();
        assert_eq!(updater.count(), 2);
        assert_eq!(updater.lookup(&"alice").map(|p| p.age), Some(30));

        updater.remove(&person("alice", 0)).unwrap();
        let cs = store.capture_changes();
        assert_eq!(cs.len(), 1);
        assert_eq!(*cs.as_slice()[0].key(), "bob");
    }

    #[test]
    fn test_updater_missing_selector_is_argument_error() {
        let mut store: ChangeAwareStore<&str, Person> = ChangeAwareStore::new();
        let mut updater = Updater::new(&mut store);

        let err = updater.add_or_update(person("alice", 30)).unwrap_err();
        assert!(matches!(err, Error::Argument { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_updater_apply_checks_selector_before_mutation() {
        let mut store: ChangeAwareStore<&str, Person> = ChangeAwareStore::new();
        let mut updater = Updater::new(&mut store);

        let result = updater.apply(vec![
            Intent::AddOrUpdateKeyed("bob", person("bob", 40)),
            Intent::AddOrUpdate(person("alice", 30)),
        ]);
        assert!(matches!(result, Err(Error::Argument { .. })));
        assert!(store.is_empty());
        assert!(!store.has_pending());
    }

    #[test]
    fn test_updater_update_requires_existing_key() {
        let mut store: ChangeAwareStore<&str, Person> = ChangeAwareStore::new();
        let mut updater = Updater::new(&mut store);

        let err = updater.update("ghost", person("ghost", 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));

        updater.add_or_update_keyed("bob", person("bob", 40));
        updater.update("bob", person("bob", 41)).unwrap();
        let cs = store.capture_changes();
        assert_eq!(cs.adds(), 1);
        assert_eq!(cs.updates(), 0);
    }

    #[test]
    fn test_updater_intents_batch() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update("carol", person("carol", 50));
        store.capture_changes();

        let selector = by_name();
        let mut updater = Updater::with_key_selector(&mut store, &selector);
        updater
            .apply(vec![
                Intent::AddOrUpdate(person("A", 1)),
                Intent::AddOrUpdate(person("B", 2)),
                Intent::RemoveKey("A"),
                Intent::RefreshKey("carol"),
            ])
            .unwrap();

        let cs = store.capture_changes();
        let reasons: Vec<_> = cs.iter().map(|c| (c.reason(), *c.key())).collect();
        // "A" was added and removed within the batch, so it nets to nothing
        assert_eq!(reasons, vec![(ChangeReason::Add, "B"), (ChangeReason::Refresh, "carol")]);
    }

    #[test]
    fn test_updater_load_replaces_content() {
        let mut store = ChangeAwareStore::new();
        let selector = by_name();
        {
            let mut updater = Updater::with_key_selector(&mut store, &selector);
            updater.add_or_update_many(vec![person("a", 1), person("b", 2)]).unwrap();
        }
        store.capture_changes();

        let mut updater = Updater::with_key_selector(&mut store, &selector);
        updater.load(vec![person("b", 2), person("c", 3)]).unwrap();
        let cs = store.capture_changes();
        assert_eq!(cs.removes(), 1);
        assert_eq!(cs.adds(), 1);
        assert_eq!(cs.updates(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_updater_refresh_all() {
        let mut store = ChangeAwareStore::new();
        store.add_or_update(1, 10);
        store.add_or_update(2, 20);
        store.capture_changes();

        Updater::new(&mut store).refresh_all();
        assert_eq!(store.capture_changes().refreshes(), 2);
    }
}
