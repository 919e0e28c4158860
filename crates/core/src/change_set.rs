//! Change set: an ordered batch of changes with per-reason counters.
//!
//! A ChangeSet is produced once per flush (store capture or operator step)
//! and handed to subscribers by reference, so it is immutable from their
//! point of view.

use crate::change::{Change, ChangeReason};

/// How a change set was produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChangeSetKind {
    /// Delta processing of upstream changes.
    #[default]
    Incremental,
    /// Recomputation of derived state from scratch after the defining
    /// parameter (predicate, comparer, selector, window) changed.
    FullRefresh,
}

/// An ordered batch of changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSet<K, V> {
    changes: Vec<Change<K, V>>,
    adds: usize,
    updates: usize,
    removes: usize,
    refreshes: usize,
    moves: usize,
    kind: ChangeSetKind,
}

impl<K, V> Default for ChangeSet<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ChangeSet<K, V> {
    /// Creates a new empty change set.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty change set pre-sized for `capacity` changes.
    ///
    /// The capacity is only a sizing hint.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            changes: Vec::with_capacity(capacity),
            adds: 0,
            updates: 0,
            removes: 0,
            refreshes: 0,
            moves: 0,
            kind: ChangeSetKind::Incremental,
        }
    }

    /// Creates an empty change set of the given kind.
    pub fn with_kind(kind: ChangeSetKind) -> Self {
        let mut set = Self::new();
        set.kind = kind;
        set
    }

    /// Appends a change and updates the counters.
    pub fn push(&mut self, change: Change<K, V>) {
        match change.reason() {
            ChangeReason::Add => self.adds += 1,
            ChangeReason::Update => self.updates += 1,
            ChangeReason::Remove => self.removes += 1,
            ChangeReason::Refresh => self.refreshes += 1,
            ChangeReason::Moved => self.moves += 1,
        }
        self.changes.push(change);
    }

    /// Returns the number of `Add` changes.
    #[inline]
    pub fn adds(&self) -> usize {
        self.adds
    }

    /// Returns the number of `Update` changes.
    #[inline]
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Returns the number of `Remove` changes.
    #[inline]
    pub fn removes(&self) -> usize {
        self.removes
    }

    /// Returns the number of `Refresh` changes.
    #[inline]
    pub fn refreshes(&self) -> usize {
        self.refreshes
    }

    /// Returns the number of `Moved` changes.
    #[inline]
    pub fn moves(&self) -> usize {
        self.moves
    }

    /// Returns the total number of changes.
    #[inline]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there are no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns how this change set was produced.
    #[inline]
    pub fn kind(&self) -> ChangeSetKind {
        self.kind
    }

    /// Returns true if this change set is a full re-evaluation.
    #[inline]
    pub fn is_full_refresh(&self) -> bool {
        self.kind == ChangeSetKind::FullRefresh
    }

    /// Tags this change set as a full re-evaluation.
    #[must_use]
    pub fn into_full_refresh(mut self) -> Self {
        self.kind = ChangeSetKind::FullRefresh;
        self
    }

    /// Returns an iterator over the changes in order.
    #[inline]
    pub fn iter(&self) -> core::slice::Iter<'_, Change<K, V>> {
        self.changes.iter()
    }

    /// Returns the changes as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[Change<K, V>] {
        &self.changes
    }

    /// Consumes the change set, returning the changes.
    #[inline]
    pub fn into_changes(self) -> Vec<Change<K, V>> {
        self.changes
    }

    /// Maps every change into another value type.
    pub fn map<U, F>(self, mut f: F) -> ChangeSet<K, U>
    where
        F: FnMut(V) -> U,
    {
        let kind = self.kind;
        let mut mapped: ChangeSet<K, U> = self.changes.into_iter().map(|c| c.map(&mut f)).collect();
        mapped.kind = kind;
        mapped
    }
}

impl<K, V> Extend<Change<K, V>> for ChangeSet<K, V> {
    fn extend<I: IntoIterator<Item = Change<K, V>>>(&mut self, iter: I) {
        for change in iter {
            self.push(change);
        }
    }
}

impl<K, V> FromIterator<Change<K, V>> for ChangeSet<K, V> {
    fn from_iter<I: IntoIterator<Item = Change<K, V>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut set = Self::with_capacity(iter.size_hint().0);
        set.extend(iter);
        set
    }
}

impl<K, V> IntoIterator for ChangeSet<K, V> {
    type Item = Change<K, V>;
    type IntoIter = std::vec::IntoIter<Change<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a, K, V> IntoIterator for &'a ChangeSet<K, V> {
    type Item = &'a Change<K, V>;
    type IntoIter = core::slice::Iter<'a, Change<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
