//! Cache configuration.

use crate::cache::{CacheKey, CacheValue, ObservableCache};
use crate::scheduler::Scheduler;
use cachet_incremental::{predicate, Predicate};
use cachet_storage::{default_equality, Equality, KeySelector};
use std::sync::Arc;

/// Tunables of an observable cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Default for connections: skip batches that net to zero changes
    pub suppress_empty_change_sets: bool,
    /// Advisory number of entries to pre-size the store for
    pub initial_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            suppress_empty_change_sets: true,
            initial_capacity: 0,
        }
    }
}

impl CacheConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default empty-batch suppression of connections.
    #[must_use]
    pub fn with_suppress_empty_change_sets(mut self, suppress: bool) -> Self {
        self.suppress_empty_change_sets = suppress;
        self
    }

    /// Sets the advisory initial capacity.
    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

/// Options of one `connect` call.
pub struct ConnectOptions<V> {
    pub(crate) predicate: Option<Predicate<V>>,
    pub(crate) suppress_empty: Option<bool>,
}

impl<V> Default for ConnectOptions<V> {
    fn default() -> Self {
        Self {
            predicate: None,
            suppress_empty: None,
        }
    }
}

impl<V> Clone for ConnectOptions<V> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            suppress_empty: self.suppress_empty,
        }
    }
}

impl<V: 'static> ConnectOptions<V> {
    /// Options with no predicate and the cache's default suppression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only deliver items matching `predicate`.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate<V>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Only deliver items for which `f` returns true.
    #[must_use]
    pub fn with_filter<F>(self, f: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.with_predicate(predicate(f))
    }

    /// Overrides the cache's empty-batch suppression for this connection.
    #[must_use]
    pub fn suppress_empty(mut self, suppress: bool) -> Self {
        self.suppress_empty = Some(suppress);
        self
    }
}

/// Assembles an `ObservableCache`.
pub struct CacheBuilder<K, V> {
    pub(crate) config: CacheConfig,
    pub(crate) equality: Option<Equality<V>>,
    pub(crate) key_selector: Option<KeySelector<K, V>>,
    pub(crate) scheduler: Option<Arc<dyn Scheduler>>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            equality: None,
            key_selector: None,
            scheduler: None,
        }
    }
}

impl<K: CacheKey, V: CacheValue> CacheBuilder<K, V> {
    /// Starts from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the default empty-batch suppression of connections.
    #[must_use]
    pub fn suppress_empty_change_sets(mut self, suppress: bool) -> Self {
        self.config.suppress_empty_change_sets = suppress;
        self
    }

    /// Sets the advisory initial capacity.
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    /// Overrides the equality policy used to detect no-op updates.
    #[must_use]
    pub fn equality<F>(mut self, f: F) -> Self
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        self.equality = Some(Arc::new(f));
        self
    }

    /// Derives keys from values, enabling edits by value.
    #[must_use]
    pub fn key_selector<F>(mut self, f: F) -> Self
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        self.key_selector = Some(Arc::new(f));
        self
    }

    /// Delivers connection streams through `scheduler`.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the cache. Without an explicit policy, updates are compared
    /// with `PartialEq`.
    pub fn build(self) -> ObservableCache<K, V>
    where
        V: PartialEq,
    {
        let equality = self.equality.clone().unwrap_or_else(default_equality);
        self.build_with_equality(equality)
    }

    /// Builds the cache with an explicit equality policy, for value types
    /// without `PartialEq`.
    pub fn build_with_equality(self, equality: Equality<V>) -> ObservableCache<K, V> {
        ObservableCache::from_parts(self.config, equality, self.key_selector, self.scheduler)
    }
}
