//! Incremental group-by operator.
//!
//! Members are partitioned by a group selector. Each group is backed by a
//! `ChangeAwareStore`, so a member that moves between groups several times
//! within one batch nets to a single change per group. A group is reported
//! as added the first time it becomes non-empty and as removed as soon as it
//! becomes empty; empty groups never linger.

use crate::func::GroupSelector;
use cachet_core::{ChangeReason, ChangeSet, ChangeSetKind, Result};
use cachet_storage::ChangeAwareStore;
use core::hash::Hash;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

/// Group-level lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupReason {
    /// The group became non-empty.
    Added,
    /// Members of an existing group changed.
    Updated,
    /// The group became empty.
    Removed,
}

/// Changes of one group within one batch.
#[derive(Clone, Debug)]
pub struct GroupChange<G, K, V> {
    group: G,
    reason: GroupReason,
    changes: ChangeSet<K, V>,
}

impl<G, K, V> GroupChange<G, K, V> {
    /// Returns the group key.
    #[inline]
    pub fn group(&self) -> &G {
        &self.group
    }

    /// Returns the group-level event.
    #[inline]
    pub fn reason(&self) -> GroupReason {
        self.reason
    }

    /// Returns the member changes of the group.
    #[inline]
    pub fn changes(&self) -> &ChangeSet<K, V> {
        &self.changes
    }

    /// Consumes the group change, returning key, event and member changes.
    pub fn into_parts(self) -> (G, GroupReason, ChangeSet<K, V>) {
        (self.group, self.reason, self.changes)
    }
}

/// Output of the group-by operator, in first-touched group order.
#[derive(Clone, Debug)]
pub struct GroupedChangeSet<G, K, V> {
    groups: Vec<GroupChange<G, K, V>>,
    kind: ChangeSetKind,
}

impl<G, K, V> GroupedChangeSet<G, K, V> {
    /// Returns the per-group changes.
    #[inline]
    pub fn groups(&self) -> &[GroupChange<G, K, V>] {
        &self.groups
    }

    /// Returns how this change set was produced.
    #[inline]
    pub fn kind(&self) -> ChangeSetKind {
        self.kind
    }

    /// Returns true if no group changed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns the keys of groups that became non-empty.
    pub fn added(&self) -> impl Iterator<Item = &G> {
        self.with_reason(GroupReason::Added)
    }

    /// Returns the keys of groups that became empty.
    pub fn removed(&self) -> impl Iterator<Item = &G> {
        self.with_reason(GroupReason::Removed)
    }

    fn with_reason(&self, reason: GroupReason) -> impl Iterator<Item = &G> {
        self.groups
            .iter()
            .filter(move |g| g.reason == reason)
            .map(|g| &g.group)
    }
}

impl<G, K, V> IntoIterator for GroupedChangeSet<G, K, V> {
    type Item = GroupChange<G, K, V>;
    type IntoIter = std::vec::IntoIter<GroupChange<G, K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Stateful group-by over a keyed change stream.
pub struct GroupBy<G, K, V> {
    selector: GroupSelector<V, G>,
    /// Member key -> (group, value)
    members: HashMap<K, (G, V)>,
    groups: HashMap<G, ChangeAwareStore<K, V>>,
}

impl<G, K, V> GroupBy<G, K, V>
where
    G: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a group-by with the given selector.
    pub fn new(selector: GroupSelector<V, G>) -> Self {
        Self {
            selector,
            members: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    /// Returns the number of non-empty groups.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Returns the group of a member.
    pub fn group_of(&self, key: &K) -> Option<&G> {
        self.members.get(key).map(|(g, _)| g)
    }

    /// Returns the members of a group, in unspecified order.
    pub fn members(&self, group: &G) -> Option<impl Iterator<Item = (&K, &V)>> {
        self.groups.get(group).map(|store| store.iter())
    }

    /// Processes one upstream change set.
    ///
    /// A selector fault aborts the batch; the operator must not be used
    /// afterwards.
    pub fn process(&mut self, changes: &ChangeSet<K, V>) -> Result<GroupedChangeSet<G, K, V>> {
        let mut batch = Batch::default();
        for change in changes {
            let key = change.key();
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    let group = (self.selector)(change.current())?;
                    self.place(key, group, change.current().clone(), false, &mut batch);
                }
                ChangeReason::Refresh => {
                    let group = (self.selector)(change.current())?;
                    self.place(key, group, change.current().clone(), true, &mut batch);
                }
                ChangeReason::Moved => {
                    if change.previous().is_some() {
                        let group = (self.selector)(change.current())?;
                        self.place(key, group, change.current().clone(), false, &mut batch);
                    }
                }
                ChangeReason::Remove => self.evict(key, &mut batch),
            }
        }
        Ok(self.finish(batch, ChangeSetKind::Incremental))
    }

    /// Replaces the selector and regroups every member whose group changes.
    ///
    /// The selector is evaluated against all members before any state
    /// changes, so a fault leaves the operator unchanged.
    pub fn set_selector(&mut self, selector: GroupSelector<V, G>) -> Result<GroupedChangeSet<G, K, V>> {
        let mut moves = Vec::new();
        for (key, (group, value)) in &self.members {
            let next = selector(value)?;
            if next != *group {
                moves.push((key.clone(), next, value.clone()));
            }
        }
        self.selector = selector;

        let mut batch = Batch::default();
        for (key, group, value) in moves {
            self.place(&key, group, value, false, &mut batch);
        }
        Ok(self.finish(batch, ChangeSetKind::FullRefresh))
    }

    fn place(&mut self, key: &K, group: G, value: V, refresh: bool, batch: &mut Batch<G>) {
        let current = self.members.get(key).map(|(g, _)| *g == group);
        if current == Some(false) {
            self.evict(key, batch);
        }

        let store = self.group_store(&group, batch);
        if refresh && current == Some(true) {
            store.refresh(key);
        } else {
            store.add_or_update(key.clone(), value.clone());
        }
        self.members.insert(key.clone(), (group, value));
    }

    fn evict(&mut self, key: &K, batch: &mut Batch<G>) {
        let Some((group, _)) = self.members.remove(key) else {
            return;
        };
        batch.touch(&group, true);
        if let Some(store) = self.groups.get_mut(&group) {
            store.remove(key);
        }
    }

    fn group_store(&mut self, group: &G, batch: &mut Batch<G>) -> &mut ChangeAwareStore<K, V> {
        let existed = self.groups.contains_key(group);
        batch.touch(group, existed);
        self.groups
            .entry(group.clone())
            .or_insert_with(|| ChangeAwareStore::with_equality(Arc::new(|_: &V, _: &V| false)))
    }

    fn finish(&mut self, batch: Batch<G>, kind: ChangeSetKind) -> GroupedChangeSet<G, K, V> {
        let mut groups = Vec::with_capacity(batch.order.len());
        for group in batch.order {
            let existed = batch.existed.contains(&group);
            let Some(store) = self.groups.get_mut(&group) else {
                continue;
            };
            let changes = store.capture_changes();
            let now_empty = store.is_empty();
            if now_empty {
                self.groups.remove(&group);
            }

            let reason = match (existed, now_empty) {
                (false, true) => continue,
                (false, false) => GroupReason::Added,
                (true, true) => GroupReason::Removed,
                (true, false) if changes.is_empty() => continue,
                (true, false) => GroupReason::Updated,
            };
            groups.push(GroupChange {
                group,
                reason,
                changes: match kind {
                    ChangeSetKind::FullRefresh => changes.into_full_refresh(),
                    ChangeSetKind::Incremental => changes,
                },
            });
        }
        GroupedChangeSet { groups, kind }
    }
}

/// Groups touched by one batch, in first-touched order.
struct Batch<G> {
    order: Vec<G>,
    seen: HashSet<G>,
    /// Groups that were non-empty before the batch
    existed: HashSet<G>,
}

impl<G> Default for Batch<G> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            seen: HashSet::new(),
            existed: HashSet::new(),
        }
    }
}

impl<G: Eq + Hash + Clone> Batch<G> {
    fn touch(&mut self, group: &G, existed: bool) {
        if self.seen.insert(group.clone()) {
            self.order.push(group.clone());
            if existed {
                self.existed.insert(group.clone());
            }
        }
    }
}
