//! Incremental sort operator.
//!
//! Maintains a list ordered by a comparer, with ties broken by arrival
//! order, and emits index-aware changes:
//!
//! - Add / Remove at the item's position
//! - Update / Refresh in place when the position does not change
//! - exactly one Moved when an update or refresh shifts the position
//!
//! Replacing the comparer re-sorts everything and emits a sequence of moves
//! that, applied in order, transforms the old order into the new one.

use crate::func::Comparer;
use cachet_core::{Change, ChangeReason, ChangeSet, ChangeSetKind, Error, Result};
use core::cmp::Ordering;
use core::hash::Hash;
use hashbrown::HashMap;
use std::sync::Arc;

/// Snapshot of a sorted view, in order.
pub type SortedItems<K, V> = Arc<Vec<(K, V)>>;

/// Why a sorted change set was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortReason {
    /// The first batch processed by the operator.
    InitialLoad,
    /// Incremental processing of upstream changes.
    DataChanged,
    /// The comparer was replaced.
    ComparerChanged,
}

/// Output of the sort operator: indexed changes plus the resulting order.
#[derive(Clone, Debug)]
pub struct SortedChangeSet<K, V> {
    changes: ChangeSet<K, V>,
    items: SortedItems<K, V>,
    reason: SortReason,
}

impl<K, V> SortedChangeSet<K, V> {
    /// Creates a sorted change set.
    pub fn new(changes: ChangeSet<K, V>, items: SortedItems<K, V>, reason: SortReason) -> Self {
        Self { changes, items, reason }
    }

    /// Returns the indexed changes.
    #[inline]
    pub fn changes(&self) -> &ChangeSet<K, V> {
        &self.changes
    }

    /// Returns the full order after the changes.
    #[inline]
    pub fn items(&self) -> &SortedItems<K, V> {
        &self.items
    }

    /// Returns why this change set was produced.
    #[inline]
    pub fn reason(&self) -> SortReason {
        self.reason
    }

    /// Returns true if there are no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Consumes the sorted change set, returning the changes.
    pub fn into_changes(self) -> ChangeSet<K, V> {
        self.changes
    }
}

/// Stateful sort over a keyed change stream.
///
/// The order is shared with the emitted snapshots and copied on write, so a
/// batch only pays for a full copy while an earlier snapshot is still held
/// downstream.
pub struct Sort<K, V> {
    comparer: Comparer<V>,
    /// Items in (comparer, arrival) order
    sorted: SortedItems<K, V>,
    /// Key -> (arrival sequence number, value the item is ordered by)
    entries: HashMap<K, (u64, V)>,
    next_seq: u64,
    loaded: bool,
}

impl<K, V> Sort<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a sort with the given comparer.
    pub fn new(comparer: Comparer<V>) -> Self {
        Self {
            comparer,
            sorted: Arc::new(Vec::new()),
            entries: HashMap::new(),
            next_seq: 0,
            loaded: false,
        }
    }

    /// Returns the number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// Returns true if there are no items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Returns the current order.
    pub fn items(&self) -> impl Iterator<Item = (&K, &V)> {
        self.sorted.iter().map(|(k, v)| (k, v))
    }

    /// Returns the current position of a key.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.locate(key).ok()
    }

    /// Processes one upstream change set.
    ///
    /// A comparer fault aborts the batch; the operator must not be used
    /// afterwards.
    pub fn process(&mut self, changes: &ChangeSet<K, V>) -> Result<SortedChangeSet<K, V>> {
        let mut out = ChangeSet::with_capacity(changes.len());
        for change in changes {
            let key = change.key();
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    self.upsert(key, change.current(), false, &mut out)?;
                }
                ChangeReason::Refresh => self.upsert(key, change.current(), true, &mut out)?,
                ChangeReason::Moved => {
                    if change.previous().is_some() {
                        self.upsert(key, change.current(), false, &mut out)?;
                    }
                }
                ChangeReason::Remove => {
                    if self.entries.contains_key(key) {
                        let index = self.locate(key)?;
                        self.entries.remove(key);
                        let (key, value) = Arc::make_mut(&mut self.sorted).remove(index);
                        out.push(Change::remove_at(key, value, index));
                    }
                }
            }
        }

        let reason = if self.loaded {
            SortReason::DataChanged
        } else {
            self.loaded = true;
            SortReason::InitialLoad
        };
        Ok(SortedChangeSet::new(out, Arc::clone(&self.sorted), reason))
    }

    /// Replaces the comparer and re-sorts every item.
    ///
    /// The emitted moves are applied sequentially: each one moves a single
    /// item from its position in the list as left by the previous moves. A
    /// fault leaves the operator unchanged.
    pub fn set_comparer(&mut self, comparer: Comparer<V>) -> Result<SortedChangeSet<K, V>> {
        let seqs = self
            .sorted
            .iter()
            .map(|(key, _)| self.seq_of(key))
            .collect::<Result<Vec<u64>>>()?;
        let order = merge_order(&self.sorted, &seqs, &comparer)?;
        let target: Vec<(K, V)> = order.iter().map(|&i| self.sorted[i].clone()).collect();
        self.comparer = comparer;

        let mut out = ChangeSet::with_kind(ChangeSetKind::FullRefresh);
        let mut working: Vec<K> = self.sorted.iter().map(|(k, _)| k.clone()).collect();
        for (index, (key, value)) in target.iter().enumerate() {
            if working[index] == *key {
                continue;
            }
            let Some(offset) = working[index..].iter().position(|k| k == key) else {
                continue;
            };
            let from = index + offset;
            let moved = working.remove(from);
            working.insert(index, moved);
            out.push(Change::moved(key.clone(), value.clone(), None, index, from));
        }

        self.sorted = Arc::new(target);
        self.loaded = true;
        Ok(SortedChangeSet::new(out, Arc::clone(&self.sorted), SortReason::ComparerChanged))
    }

    fn upsert(&mut self, key: &K, value: &V, refresh: bool, out: &mut ChangeSet<K, V>) -> Result<()> {
        let Some(&(seq, _)) = self.entries.get(key) else {
            let seq = self.next_seq;
            self.next_seq += 1;
            let index = self.insertion_point(value, seq)?;
            Arc::make_mut(&mut self.sorted).insert(index, (key.clone(), value.clone()));
            self.entries.insert(key.clone(), (seq, value.clone()));
            out.push(Change::add_at(key.clone(), value.clone(), index));
            return Ok(());
        };

        let from = self.locate(key)?;
        let (_, previous) = Arc::make_mut(&mut self.sorted).remove(from);
        // The key is out of the list, so the search never compares against it
        let to = match self.insertion_point(value, seq) {
            Ok(to) => to,
            Err(error) => {
                Arc::make_mut(&mut self.sorted).insert(from, (key.clone(), previous));
                return Err(error);
            }
        };
        Arc::make_mut(&mut self.sorted).insert(to, (key.clone(), value.clone()));
        self.entries.insert(key.clone(), (seq, value.clone()));

        let change = match (from == to, refresh) {
            (true, false) => Change::update_at(key.clone(), value.clone(), previous, to, from),
            (true, true) => Change::refresh_at(key.clone(), value.clone(), to),
            (false, false) => Change::moved(key.clone(), value.clone(), Some(previous), to, from),
            (false, true) => Change::moved(key.clone(), value.clone(), None, to, from),
        };
        out.push(change);
        Ok(())
    }

    /// First index whose item orders at or after (value, seq).
    fn insertion_point(&self, value: &V, seq: u64) -> Result<usize> {
        let (mut lo, mut hi) = (0, self.sorted.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (key, current) = &self.sorted[mid];
            let ord = (self.comparer)(current, value)?.then(self.seq_of(key)?.cmp(&seq));
            if ord == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Current index of a key, found by searching for its stored value.
    ///
    /// Falls back to a scan if the comparer is not consistent with itself.
    fn locate(&self, key: &K) -> Result<usize> {
        let (seq, value) = self
            .entries
            .get(key)
            .ok_or_else(|| Error::invalid_operation("sorted item not found"))?;
        let index = self.insertion_point(value, *seq)?;
        match self.sorted.get(index) {
            Some((found, _)) if found == key => Ok(index),
            _ => self
                .sorted
                .iter()
                .position(|(k, _)| k == key)
                .ok_or_else(|| Error::invalid_operation("sorted item not found")),
        }
    }

    fn seq_of(&self, key: &K) -> Result<u64> {
        self.entries
            .get(key)
            .map(|(seq, _)| *seq)
            .ok_or_else(|| Error::invalid_operation("sorted item not found"))
    }
}

/// Bottom-up merge sort of `items` by (comparer, arrival), returning the new
/// order as indices into `items`. Stops at the first comparer fault.
fn merge_order<K, V>(items: &[(K, V)], seqs: &[u64], comparer: &Comparer<V>) -> Result<Vec<usize>> {
    let len = items.len();
    let mut order: Vec<usize> = (0..len).collect();
    let mut merged = vec![0; len];
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut left, mut right) = (start, mid);
            for slot in &mut merged[start..end] {
                let take_left = if left < mid && right < end {
                    let (a, b) = (order[left], order[right]);
                    comparer(&items[a].1, &items[b].1)?.then(seqs[a].cmp(&seqs[b])) != Ordering::Greater
                } else {
                    left < mid
                };
                if take_left {
                    *slot = order[left];
                    left += 1;
                } else {
                    *slot = order[right];
                    right += 1;
                }
            }
            start = end;
        }
        core::mem::swap(&mut order, &mut merged);
        width *= 2;
    }
    Ok(order)
}
