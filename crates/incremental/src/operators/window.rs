//! Window over a sorted view, shared by the page and virtualize operators.
//!
//! The window tracks which items of the sorted order fall inside
//! `[start, start + size)` and diffs the previous window against the new
//! one. The emitted changes apply sequentially to the previous window:
//! removals first (highest index first), then adds and moves at their
//! target positions. Items that stay inside the window are reported only
//! when upstream updated or refreshed them.

use crate::operators::sort::{SortedChangeSet, SortedItems};
use cachet_core::{Change, ChangeReason, ChangeSet, ChangeSetKind};
use core::hash::Hash;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Touch {
    Update,
    Refresh,
}

pub(crate) struct Window<K, V> {
    items: SortedItems<K, V>,
    current: Vec<(K, V)>,
}

impl<K, V> Window<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            current: Vec::new(),
        }
    }

    /// Number of items in the underlying sorted view.
    #[inline]
    pub(crate) fn total(&self) -> usize {
        self.items.len()
    }

    /// Number of items currently inside the window.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.current.len()
    }

    /// Items currently inside the window, in order.
    pub(crate) fn items(&self) -> &[(K, V)] {
        &self.current
    }

    /// Immutable copy of the window contents.
    pub(crate) fn snapshot(&self) -> SortedItems<K, V> {
        Arc::new(self.current.clone())
    }

    /// Takes the latest order and the set of items upstream touched.
    pub(crate) fn ingest(&mut self, sorted: &SortedChangeSet<K, V>) -> HashMap<K, ChangeReason> {
        self.items = Arc::clone(sorted.items());
        let mut touched = HashMap::new();
        for change in sorted.changes() {
            match change.reason() {
                ChangeReason::Update | ChangeReason::Refresh => {
                    touched.insert(change.key().clone(), change.reason());
                }
                ChangeReason::Moved if change.previous().is_some() => {
                    touched.insert(change.key().clone(), ChangeReason::Update);
                }
                _ => {}
            }
        }
        touched
    }

    /// Recomputes the window `[start, start + size)` and returns the changes
    /// that turn the previous window into the new one.
    pub(crate) fn diff(
        &mut self,
        start: usize,
        size: usize,
        touched: &HashMap<K, ChangeReason>,
        kind: ChangeSetKind,
    ) -> ChangeSet<K, V> {
        let start = start.min(self.items.len());
        let end = start.saturating_add(size).min(self.items.len());
        let next = &self.items[start..end];
        let next_keys: HashSet<&K> = next.iter().map(|(k, _)| k).collect();

        let mut out = ChangeSet::with_kind(kind);
        let mut working = core::mem::take(&mut self.current);

        for index in (0..working.len()).rev() {
            if !next_keys.contains(&working[index].0) {
                let (key, value) = working.remove(index);
                out.push(Change::remove_at(key, value, index));
            }
        }

        for (index, (key, value)) in next.iter().enumerate() {
            let touch = match touched.get(key) {
                Some(ChangeReason::Update) => Some(Touch::Update),
                Some(ChangeReason::Refresh) => Some(Touch::Refresh),
                _ => None,
            };

            if index < working.len() && working[index].0 == *key {
                let previous = core::mem::replace(&mut working[index].1, value.clone());
                match touch {
                    Some(Touch::Update) => {
                        out.push(Change::update_at(key.clone(), value.clone(), previous, index, index));
                    }
                    Some(Touch::Refresh) => out.push(Change::refresh_at(key.clone(), value.clone(), index)),
                    None => {}
                }
                continue;
            }

            match working[index..].iter().position(|(k, _)| k == key) {
                Some(offset) => {
                    let from = index + offset;
                    let (_, previous) = working.remove(from);
                    let previous = (touch == Some(Touch::Update)).then_some(previous);
                    out.push(Change::moved(key.clone(), value.clone(), previous, index, from));
                }
                None => out.push(Change::add_at(key.clone(), value.clone(), index)),
            }
            working.insert(index, (key.clone(), value.clone()));
        }

        self.current = working;
        out
    }
}
