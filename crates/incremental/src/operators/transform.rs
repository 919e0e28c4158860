//! Incremental transform operator.

use crate::func::Transformer;
use cachet_core::{Change, ChangeReason, ChangeSet, Result};
use core::hash::Hash;
use hashbrown::HashMap;

/// Maps the values of a keyed change stream into another type.
///
/// Reasons, keys and indices are preserved. Transformed values are cached
/// per key, so removals carry exactly the value downstream last saw and the
/// transform runs only once per upstream value.
pub struct Transform<K, V, U> {
    transformer: Transformer<V, U>,
    cache: HashMap<K, U>,
}

impl<K, V, U> Transform<K, V, U>
where
    K: Eq + Hash + Clone,
    U: Clone,
{
    /// Creates a transform with the given mapping.
    pub fn new(transformer: Transformer<V, U>) -> Self {
        Self {
            transformer,
            cache: HashMap::new(),
        }
    }

    /// Returns the number of transformed items.
    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if nothing has been transformed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Returns the transformed value of a key.
    pub fn lookup(&self, key: &K) -> Option<&U> {
        self.cache.get(key)
    }

    /// Processes one upstream change set.
    ///
    /// A transform fault aborts the batch; the operator must not be used
    /// afterwards.
    pub fn process(&mut self, changes: &ChangeSet<K, V>) -> Result<ChangeSet<K, U>> {
        let mut out = ChangeSet::with_capacity(changes.len());
        for change in changes {
            let key = change.key().clone();
            let ci = change.current_index();
            let pi = change.previous_index();
            let mapped = match change.reason() {
                ChangeReason::Add => {
                    let current = (self.transformer)(change.current())?;
                    self.cache.insert(key.clone(), current.clone());
                    Change::new(ChangeReason::Add, key, current, None, ci, pi)?
                }
                ChangeReason::Update | ChangeReason::Refresh => {
                    let current = (self.transformer)(change.current())?;
                    let previous = match self.cache.insert(key.clone(), current.clone()) {
                        Some(previous) => previous,
                        None => current.clone(),
                    };
                    Change::new(change.reason(), key, current, Some(previous), ci, pi)?
                }
                ChangeReason::Moved => {
                    let previous = self.cache.get(&key).cloned();
                    let current = match (change.previous(), previous.clone()) {
                        (None, Some(cached)) => cached,
                        _ => {
                            let current = (self.transformer)(change.current())?;
                            self.cache.insert(key.clone(), current.clone());
                            current
                        }
                    };
                    let previous = change.previous().and(previous);
                    Change::new(ChangeReason::Moved, key, current, previous, ci, pi)?
                }
                ChangeReason::Remove => {
                    let current = match self.cache.remove(&key) {
                        Some(current) => current,
                        None => (self.transformer)(change.current())?,
                    };
                    Change::new(ChangeReason::Remove, key, current, None, ci, pi)?
                }
            };
            out.push(mapped);
        }
        Ok(if changes.is_full_refresh() {
            out.into_full_refresh()
        } else {
            out
        })
    }
}
