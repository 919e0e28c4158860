//! A single keyed mutation record.
//!
//! A `Change` describes one net mutation of one key: its reason, the value
//! after the mutation and, where meaningful, the value before it. Index-aware
//! producers (sorted and paged views) additionally populate positions.

use crate::error::{Error, Result};

/// Why a change was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeReason {
    /// The key was not present and now is.
    Add,
    /// The value of an existing key was replaced.
    Update,
    /// The key was present and no longer is.
    Remove,
    /// The value should be re-evaluated by downstream operators; its identity
    /// is unchanged but its content may have been mutated.
    Refresh,
    /// The value changed position within an ordered view.
    Moved,
}

/// A single immutable mutation record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<K, V> {
    reason: ChangeReason,
    key: K,
    current: V,
    previous: Option<V>,
    current_index: Option<usize>,
    previous_index: Option<usize>,
}

impl<K, V> Change<K, V> {
    /// Creates a change after checking the invariants of its reason.
    ///
    /// - `Add` and `Remove` never carry a previous value.
    /// - `Update` always carries a previous value.
    /// - `Moved` carries both indices.
    pub fn new(
        reason: ChangeReason,
        key: K,
        current: V,
        previous: Option<V>,
        current_index: Option<usize>,
        previous_index: Option<usize>,
    ) -> Result<Self> {
        match reason {
            ChangeReason::Add | ChangeReason::Remove if previous.is_some() => {
                return Err(Error::invalid_operation(format!(
                    "{reason:?} change cannot carry a previous value"
                )));
            }
            ChangeReason::Update if previous.is_none() => {
                return Err(Error::invalid_operation(
                    "Update change requires a previous value",
                ));
            }
            ChangeReason::Moved if current_index.is_none() || previous_index.is_none() => {
                return Err(Error::invalid_operation(
                    "Moved change requires both current and previous index",
                ));
            }
            _ => {}
        }
        Ok(Self {
            reason,
            key,
            current,
            previous,
            current_index,
            previous_index,
        })
    }

    /// Creates an `Add` change.
    #[inline]
    pub fn add(key: K, current: V) -> Self {
        Self::raw(ChangeReason::Add, key, current, None, None, None)
    }

    /// Creates an `Add` change at a position of an ordered view.
    #[inline]
    pub fn add_at(key: K, current: V, index: usize) -> Self {
        Self::raw(ChangeReason::Add, key, current, None, Some(index), None)
    }

    /// Creates an `Update` change.
    #[inline]
    pub fn update(key: K, current: V, previous: V) -> Self {
        Self::raw(ChangeReason::Update, key, current, Some(previous), None, None)
    }

    /// Creates an `Update` change in an ordered view.
    #[inline]
    pub fn update_at(key: K, current: V, previous: V, current_index: usize, previous_index: usize) -> Self {
        Self::raw(
            ChangeReason::Update,
            key,
            current,
            Some(previous),
            Some(current_index),
            Some(previous_index),
        )
    }

    /// Creates a `Remove` change. `current` is the value being removed.
    #[inline]
    pub fn remove(key: K, current: V) -> Self {
        Self::raw(ChangeReason::Remove, key, current, None, None, None)
    }

    /// Creates a `Remove` change at a position of an ordered view.
    #[inline]
    pub fn remove_at(key: K, current: V, index: usize) -> Self {
        Self::raw(ChangeReason::Remove, key, current, None, Some(index), None)
    }

    /// Creates a `Moved` change. `previous` is set when the move was caused
    /// by a content change of the value.
    #[inline]
    pub fn moved(key: K, current: V, previous: Option<V>, current_index: usize, previous_index: usize) -> Self {
        Self::raw(
            ChangeReason::Moved,
            key,
            current,
            previous,
            Some(current_index),
            Some(previous_index),
        )
    }

    fn raw(
        reason: ChangeReason,
        key: K,
        current: V,
        previous: Option<V>,
        current_index: Option<usize>,
        previous_index: Option<usize>,
    ) -> Self {
        Self {
            reason,
            key,
            current,
            previous,
            current_index,
            previous_index,
        }
    }

    /// Returns the reason of this change.
    #[inline]
    pub fn reason(&self) -> ChangeReason {
        self.reason
    }

    /// Returns the key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value after the change (the removed value for `Remove`).
    #[inline]
    pub fn current(&self) -> &V {
        &self.current
    }

    /// Returns the value before the change, if any.
    #[inline]
    pub fn previous(&self) -> Option<&V> {
        self.previous.as_ref()
    }

    /// Returns the position after the change in an ordered view.
    #[inline]
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Returns the position before the change in an ordered view.
    #[inline]
    pub fn previous_index(&self) -> Option<usize> {
        self.previous_index
    }

    /// Consumes the change, returning key and current value.
    #[inline]
    pub fn into_key_value(self) -> (K, V) {
        (self.key, self.current)
    }

    /// Maps the values to a new type, keeping reason, key and indices.
    pub fn map<U, F>(self, mut f: F) -> Change<K, U>
    where
        F: FnMut(V) -> U,
    {
        Change {
            reason: self.reason,
            key: self.key,
            current: f(self.current),
            previous: self.previous.map(&mut f),
            current_index: self.current_index,
            previous_index: self.previous_index,
        }
    }

    /// Maps the values to a new type with a fallible mapper.
    pub fn try_map<U, F>(self, mut f: F) -> Result<Change<K, U>>
    where
        F: FnMut(V) -> Result<U>,
    {
        let previous = match self.previous {
            Some(previous) => Some(f(previous)?),
            None => None,
        };
        Ok(Change {
            reason: self.reason,
            key: self.key,
            current: f(self.current)?,
            previous,
            current_index: self.current_index,
            previous_index: self.previous_index,
        })
    }

    /// Returns the change with its indices stripped.
    pub fn without_indices(self) -> Self {
        Self {
            current_index: None,
            previous_index: None,
            ..self
        }
    }
}

impl<K, V: Clone> Change<K, V> {
    /// Creates a `Refresh` change, carrying the value as both current and
    /// previous.
    #[inline]
    pub fn refresh(key: K, current: V) -> Self {
        let previous = current.clone();
        Self::raw(ChangeReason::Refresh, key, current, Some(previous), None, None)
    }

    /// Creates a `Refresh` change at a position of an ordered view.
    #[inline]
    pub fn refresh_at(key: K, current: V, index: usize) -> Self {
        let previous = current.clone();
        Self::raw(
            ChangeReason::Refresh,
            key,
            current,
            Some(previous),
            Some(index),
            Some(index),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_add() {
        let c = Change::add("a", 1);
        assert_eq!(c.reason(), ChangeReason::Add);
        assert_eq!(*c.key(), "a");
        assert_eq!(*c.current(), 1);
        assert!(c.previous().is_none());
        assert!(c.current_index().is_none());
    }

    #[test]
    fn test_change_refresh_carries_previous() {
        let c = Change::refresh(1u32, "x".to_string());
        assert_eq!(c.reason(), ChangeReason::Refresh);
        assert_eq!(c.previous().map(String::as_str), Some("x"));
    }

    #[test]
    fn test_change_new_checks_invariants() {
        assert!(Change::new(ChangeReason::Add, 1, 10, Some(9), None, None).is_err());
        assert!(Change::new(ChangeReason::Remove, 1, 10, Some(9), None, None).is_err());
        assert!(Change::new(ChangeReason::Update, 1, 10, None, None, None).is_err());
        assert!(Change::new(ChangeReason::Moved, 1, 10, None, Some(0), None).is_err());

        let moved = Change::new(ChangeReason::Moved, 1, 10, None, Some(0), Some(3)).unwrap();
        assert_eq!(moved.current_index(), Some(0));
        assert_eq!(moved.previous_index(), Some(3));

        let update = Change::new(ChangeReason::Update, 1, 10, Some(9), None, None).unwrap();
        assert_eq!(update, Change::update(1, 10, 9));
    }

    #[test]
    fn test_change_map() {
        let c = Change::update_at("k", 2, 1, 0, 4).map(|v| v * 10);
        assert_eq!(*c.current(), 20);
        assert_eq!(c.previous(), Some(&10));
        assert_eq!(c.current_index(), Some(0));
        assert_eq!(c.previous_index(), Some(4));
    }

    #[test]
    fn test_change_try_map_propagates_error() {
        let c = Change::update("k", 2, 1);
        let result = c.try_map(|v| {
            if v == 1 {
                Err(Error::upstream_fault("odd"))
            } else {
                Ok(v)
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_change_without_indices() {
        let c = Change::add_at("k", 1, 5).without_indices();
        assert!(c.current_index().is_none());
    }
}
