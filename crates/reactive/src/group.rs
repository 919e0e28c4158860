//! Grouped views.
//!
//! `group_by` partitions a change stream into child caches, one per group
//! key. The outer stream carries group-level events only: a group is added
//! the first time it becomes non-empty and removed when its last member
//! leaves. Member changes are applied to the group's cache before the
//! group-level event is delivered, so a subscriber connecting to a freshly
//! added group sees its members in the initial batch.

use crate::cache::{CacheKey, CacheValue, ObservableCache};
use crate::observable::{listener, Listener, Notification, Observable, Stream};
use crate::operators::Operator;
use cachet_core::{Change, ChangeSet, Error, Result};
use cachet_incremental::{GroupBy, GroupReason, GroupSelector, GroupedChangeSet};
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// One group of a grouped view.
#[derive(Clone)]
pub struct Group<K, V, G> {
    key: G,
    cache: ObservableCache<K, V>,
}

impl<K, V, G: core::fmt::Debug> core::fmt::Debug for Group<K, V, G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Group").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<K: CacheKey, V: CacheValue, G> Group<K, V, G> {
    fn new(key: G) -> Self {
        Self {
            key,
            cache: ObservableCache::mirror(),
        }
    }

    /// Returns the group key.
    #[inline]
    pub fn key(&self) -> &G {
        &self.key
    }

    /// Returns the cache holding the members of this group.
    #[inline]
    pub fn cache(&self) -> &ObservableCache<K, V> {
        &self.cache
    }

    /// Connects to the members of this group.
    pub fn connect(&self) -> Stream<ChangeSet<K, V>> {
        self.cache.connect()
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if the group has no members. Only observable after the
    /// group was removed.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Work queued by the group operator for delivery outside its lock.
enum GroupStep<K, V, G> {
    Batch {
        edits: Vec<(ObservableCache<K, V>, ChangeSet<K, V>)>,
        changes: ChangeSet<G, Group<K, V, G>>,
        removed: Vec<ObservableCache<K, V>>,
    },
    Finish {
        children: Vec<ObservableCache<K, V>>,
        error: Option<Error>,
    },
}

type GroupOperator<K, V, G> = Operator<GroupState<K, V, G>, GroupStep<K, V, G>>;

struct GroupState<K, V, G> {
    grouping: GroupBy<G, K, V>,
    groups: HashMap<G, Group<K, V, G>>,
    finished: bool,
}

impl<K: CacheKey, V: CacheValue, G: CacheKey> GroupState<K, V, G> {
    fn new(selector: GroupSelector<V, G>) -> Self {
        Self {
            grouping: GroupBy::new(selector),
            groups: HashMap::new(),
            finished: false,
        }
    }

    fn process(&mut self, changes: &ChangeSet<K, V>) -> Option<GroupStep<K, V, G>> {
        if self.finished {
            return None;
        }
        let grouped = self.grouping.process(changes);
        self.absorb(grouped)
    }

    fn regroup(&mut self, selector: &GroupSelector<V, G>) -> Option<GroupStep<K, V, G>> {
        if self.finished {
            return None;
        }
        tracing::debug!(groups = self.groups.len(), "group selector replaced");
        let grouped = self.grouping.set_selector(Arc::clone(selector));
        self.absorb(grouped)
    }

    fn absorb(&mut self, grouped: Result<GroupedChangeSet<G, K, V>>) -> Option<GroupStep<K, V, G>> {
        let grouped = match grouped {
            Ok(grouped) => grouped,
            Err(error) => {
                tracing::error!(%error, "group selector faulted");
                return self.finish(Some(error));
            }
        };

        let mut edits = Vec::new();
        let mut changes = ChangeSet::with_kind(grouped.kind());
        let mut removed = Vec::new();
        for group_change in grouped {
            let (key, reason, members) = group_change.into_parts();
            match reason {
                GroupReason::Added => {
                    let group = Group::new(key.clone());
                    edits.push((group.cache.clone(), members));
                    changes.push(Change::add(key.clone(), group.clone()));
                    self.groups.insert(key, group);
                }
                GroupReason::Updated => {
                    if let Some(group) = self.groups.get(&key) {
                        edits.push((group.cache.clone(), members));
                    }
                }
                GroupReason::Removed => {
                    if let Some(group) = self.groups.remove(&key) {
                        edits.push((group.cache.clone(), members));
                        removed.push(group.cache.clone());
                        changes.push(Change::remove(key, group));
                    }
                }
            }
        }
        tracing::trace!(groups = self.groups.len(), changes = changes.len(), "groups updated");

        if edits.is_empty() && changes.is_empty() {
            return None;
        }
        Some(GroupStep::Batch {
            edits,
            changes,
            removed,
        })
    }

    fn finish(&mut self, error: Option<Error>) -> Option<GroupStep<K, V, G>> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let children = self.groups.drain().map(|(_, group)| group.cache).collect();
        Some(GroupStep::Finish { children, error })
    }
}

fn deliver<K, V, G>(
    downstream: Listener<ChangeSet<G, Group<K, V, G>>>,
    operator: Arc<OnceLock<Weak<GroupOperator<K, V, G>>>>,
) -> Listener<GroupStep<K, V, G>>
where
    K: CacheKey,
    V: CacheValue,
    G: CacheKey,
{
    let failed = AtomicBool::new(false);
    listener(move |notification: &Notification<GroupStep<K, V, G>>| {
        let Notification::Next(step) = notification else {
            if let Some(terminal) = notification.terminal() {
                downstream(&terminal);
            }
            return;
        };
        match step {
            GroupStep::Batch {
                edits,
                changes,
                removed,
            } => {
                if failed.load(Ordering::Acquire) {
                    return;
                }
                for (cache, members) in edits {
                    if let Err(error) = cache.apply_change_set(members.clone()) {
                        let fault = Error::upstream_fault(format!("group cache rejected change set: {error}"));
                        tracing::error!(%fault, "group faulted");
                        failed.store(true, Ordering::Release);
                        for cache in removed {
                            cache.fail(fault.clone());
                        }
                        // Queued behind this delivery; fails the remaining groups
                        if let Some(operator) = operator.get().and_then(Weak::upgrade) {
                            operator.step(|state| Ok(state.finish(Some(fault))));
                        }
                        return;
                    }
                }
                if !changes.is_empty() {
                    downstream(&Notification::Next(changes.clone()));
                }
                for cache in removed {
                    cache.complete();
                }
            }
            GroupStep::Finish { children, error } => {
                for cache in children {
                    match error {
                        Some(error) => cache.fail(error.clone()),
                        None => cache.complete(),
                    }
                }
                downstream(&match error {
                    Some(error) => Notification::Error(error.clone()),
                    None => Notification::Completed,
                });
            }
        }
    })
}

/// Groups `upstream` by `selector`; every value of `selectors` regroups.
pub(crate) fn group_stream<K, V, G>(
    upstream: impl Observable<ChangeSet<K, V>> + 'static,
    selector: GroupSelector<V, G>,
    selectors: impl Observable<GroupSelector<V, G>> + 'static,
) -> Stream<ChangeSet<G, Group<K, V, G>>>
where
    K: CacheKey,
    V: CacheValue,
    G: CacheKey,
{
    Stream::create(move |downstream: Listener<ChangeSet<G, Group<K, V, G>>>| {
        let handle = Arc::new(OnceLock::new());
        let operator = Operator::new(
            GroupState::new(Arc::clone(&selector)),
            deliver(downstream, Arc::clone(&handle)),
        );
        let _ = handle.set(Arc::downgrade(&operator));
        let data = {
            let operator = Arc::clone(&operator);
            upstream.subscribe(listener(move |notification: &Notification<ChangeSet<K, V>>| match notification {
                Notification::Next(changes) => operator.step(|state| Ok(state.process(changes))),
                Notification::Error(error) => operator.step(|state| Ok(state.finish(Some(error.clone())))),
                Notification::Completed => operator.step(|state| Ok(state.finish(None))),
            }))
        };
        let regroup = selectors.subscribe(listener(move |notification: &Notification<GroupSelector<V, G>>| {
            match notification {
                Notification::Next(selector) => operator.step(|state| Ok(state.regroup(selector))),
                Notification::Error(error) => operator.step(|state| Ok(state.finish(Some(error.clone())))),
                Notification::Completed => {}
            }
        }));
        data.with(regroup)
    })
}
