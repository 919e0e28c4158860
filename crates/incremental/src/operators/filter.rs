//! Incremental filter operator.
//!
//! Implements matched-set diffing: every upstream change is translated by
//! whether the item enters, stays in, or leaves the set of values matching
//! the predicate.
//!
//! | was matched | is matched | emitted             |
//! |-------------|------------|---------------------|
//! | no          | yes        | Add                 |
//! | yes         | yes        | Update / Refresh    |
//! | yes         | no         | Remove              |
//! | no          | no         | nothing             |

use crate::func::Predicate;
use cachet_core::{Change, ChangeReason, ChangeSet, ChangeSetKind, Result};
use core::hash::Hash;
use hashbrown::{HashMap, HashSet};

/// Stateful filter over a keyed change stream.
///
/// The filter keeps every upstream item so that a replaced predicate can be
/// re-evaluated without consulting the source.
pub struct Filter<K, V> {
    predicate: Predicate<V>,
    items: HashMap<K, V>,
    matched: HashSet<K>,
}

impl<K, V> Filter<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a filter with the given predicate.
    pub fn new(predicate: Predicate<V>) -> Self {
        Self {
            predicate,
            items: HashMap::new(),
            matched: HashSet::new(),
        }
    }

    /// Returns the number of matched items.
    #[inline]
    pub fn len(&self) -> usize {
        self.matched.len()
    }

    /// Returns true if no item matches.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }

    /// Returns true if the key is currently part of the filtered view.
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.matched.contains(key)
    }

    /// Returns the matched items, in unspecified order.
    pub fn matched(&self) -> impl Iterator<Item = (&K, &V)> {
        self.matched
            .iter()
            .filter_map(move |k| self.items.get(k).map(|v| (k, v)))
    }

    /// Processes one upstream change set.
    ///
    /// A predicate fault aborts the batch; the operator must not be used
    /// afterwards.
    pub fn process(&mut self, changes: &ChangeSet<K, V>) -> Result<ChangeSet<K, V>> {
        let mut out = ChangeSet::with_capacity(changes.len());
        for change in changes {
            let key = change.key();
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    self.evaluate(key, change.current(), false, &mut out)?;
                }
                ChangeReason::Refresh => {
                    self.evaluate(key, change.current(), true, &mut out)?;
                }
                ChangeReason::Moved => {
                    // Position only; ordering is not meaningful here
                    if change.previous().is_some() {
                        self.evaluate(key, change.current(), false, &mut out)?;
                    }
                }
                ChangeReason::Remove => {
                    let stored = self.items.remove(key);
                    if self.matched.remove(key) {
                        let removed = stored.unwrap_or_else(|| change.current().clone());
                        out.push(Change::remove(key.clone(), removed));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Replaces the predicate and re-evaluates every item.
    ///
    /// Only matched-set deltas are emitted; items whose membership does not
    /// change are not touched. The predicate is evaluated against all items
    /// before any state changes, so a fault leaves the filter unchanged.
    pub fn set_predicate(&mut self, predicate: Predicate<V>) -> Result<ChangeSet<K, V>> {
        let mut verdicts = Vec::with_capacity(self.items.len());
        for (key, value) in &self.items {
            verdicts.push((key.clone(), predicate(value)?));
        }
        self.predicate = predicate;

        let mut out = ChangeSet::with_kind(ChangeSetKind::FullRefresh);
        for (key, now) in verdicts {
            let was = self.matched.contains(&key);
            let Some(value) = self.items.get(&key) else {
                continue;
            };
            match (was, now) {
                (false, true) => {
                    out.push(Change::add(key.clone(), value.clone()));
                    self.matched.insert(key);
                }
                (true, false) => {
                    out.push(Change::remove(key.clone(), value.clone()));
                    self.matched.remove(&key);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn evaluate(&mut self, key: &K, current: &V, refresh: bool, out: &mut ChangeSet<K, V>) -> Result<()> {
        let now = (self.predicate)(current)?;
        let was = self.matched.contains(key);
        let previous = self.items.insert(key.clone(), current.clone());

        match (was, now) {
            (false, true) => {
                self.matched.insert(key.clone());
                out.push(Change::add(key.clone(), current.clone()));
            }
            (true, true) => match previous {
                Some(previous) if !refresh => {
                    out.push(Change::update(key.clone(), current.clone(), previous));
                }
                _ => out.push(Change::refresh(key.clone(), current.clone())),
            },
            (true, false) => {
                self.matched.remove(key);
                let removed = previous.unwrap_or_else(|| current.clone());
                out.push(Change::remove(key.clone(), removed));
            }
            (false, false) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{predicate, try_predicate};
    use cachet_core::Error;

    fn batch(changes: Vec<Change<&'static str, i32>>) -> ChangeSet<&'static str, i32> {
        changes.into_iter().collect()
    }

    fn reasons(cs: &ChangeSet<&'static str, i32>) -> Vec<(ChangeReason, &'static str)> {
        cs.iter().map(|c| (c.reason(), *c.key())).collect()
    }

    #[test]
    fn test_filter_matched_set_diffing() {
        let mut filter = Filter::new(predicate(|v: &i32| *v > 10));

        let out = filter
            .process(&batch(vec![Change::add("a", 5), Change::add("b", 20)]))
            .unwrap();
        assert_eq!(reasons(&out), vec![(ChangeReason::Add, "b")]);

        // a enters, b stays, then b leaves
        let out = filter
            .process(&batch(vec![
                Change::update("a", 15, 5),
                Change::update("b", 25, 20),
            ]))
            .unwrap();
        assert_eq!(reasons(&out), vec![(ChangeReason::Add, "a"), (ChangeReason::Update, "b")]);
        assert_eq!(out.as_slice()[1].previous(), Some(&20));

        let out = filter.process(&batch(vec![Change::update("b", 1, 25)])).unwrap();
        assert_eq!(reasons(&out), vec![(ChangeReason::Remove, "b")]);
        assert_eq!(*out.as_slice()[0].current(), 25);

        // Changing while unmatched emits nothing
        let out = filter.process(&batch(vec![Change::update("b", 2, 1)])).unwrap();
        assert!(out.is_empty());
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_filter_remove_only_when_matched() {
        let mut filter = Filter::new(predicate(|v: &i32| *v > 10));
        filter
            .process(&batch(vec![Change::add("a", 5), Change::add("b", 20)]))
            .unwrap();

        let out = filter
            .process(&batch(vec![Change::remove("a", 5), Change::remove("b", 20)]))
            .unwrap();
        assert_eq!(reasons(&out), vec![(ChangeReason::Remove, "b")]);
        assert!(filter.is_empty());
    }

    #[test]
    fn test_filter_refresh_reevaluates() {
        let mut filter = Filter::new(predicate(|v: &i32| *v % 2 == 0));
        filter.process(&batch(vec![Change::add("a", 2)])).unwrap();

        let out = filter.process(&batch(vec![Change::refresh("a", 2)])).unwrap();
        assert_eq!(reasons(&out), vec![(ChangeReason::Refresh, "a")]);

        let out = filter.process(&batch(vec![Change::refresh("a", 3)])).unwrap();
        assert_eq!(reasons(&out), vec![(ChangeReason::Remove, "a")]);
    }

    #[test]
    fn test_filter_set_predicate_emits_only_deltas() {
        let mut filter = Filter::new(predicate(|v: &i32| *v > 10));
        filter
            .process(&batch(vec![
                Change::add("a", 5),
                Change::add("b", 20),
                Change::add("c", 30),
            ]))
            .unwrap();

        let out = filter.set_predicate(predicate(|v: &i32| *v < 25)).unwrap();
        assert!(out.is_full_refresh());
        assert_eq!(out.adds(), 1);
        assert_eq!(out.removes(), 1);
        assert_eq!(out.updates() + out.refreshes(), 0);
        assert!(filter.contains(&"a"));
        assert!(filter.contains(&"b"));
        assert!(!filter.contains(&"c"));
    }

    #[test]
    fn test_filter_predicate_fault_propagates() {
        let mut filter = Filter::new(try_predicate(|v: &i32| {
            if *v < 0 {
                Err(Error::upstream_fault("negative value"))
            } else {
                Ok(true)
            }
        }));
        filter.process(&batch(vec![Change::add("a", 1)])).unwrap();

        let err = filter.process(&batch(vec![Change::add("b", -1)])).unwrap_err();
        assert!(err.is_upstream_fault());
    }

    #[test]
    fn test_filter_set_predicate_fault_leaves_state() {
        let mut filter = Filter::new(predicate(|_: &i32| true));
        filter
            .process(&batch(vec![Change::add("a", 1), Change::add("b", 2)]))
            .unwrap();

        let result = filter.set_predicate(try_predicate(|v: &i32| {
            if *v == 2 {
                Err(Error::upstream_fault("boom"))
            } else {
                Ok(false)
            }
        }));
        assert!(result.is_err());
        assert_eq!(filter.len(), 2);
    }
}
