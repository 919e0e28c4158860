//! Property-based tests for cachet-storage using proptest.

use cachet_core::ChangeReason;
use cachet_storage::ChangeAwareStore;
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Put(u8, i32),
    Remove(u8),
    Refresh(u8),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..16, 0i32..4).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (0u8..16).prop_map(Op::Remove),
        1 => (0u8..16).prop_map(Op::Refresh),
        1 => Just(Op::Clear),
    ]
}

fn apply(store: &mut ChangeAwareStore<u8, i32>, op: &Op) {
    match *op {
        Op::Put(k, v) => store.add_or_update(k, v),
        Op::Remove(k) => store.remove(&k),
        Op::Refresh(k) => store.refresh(&k),
        Op::Clear => store.clear(),
    }
}

fn snapshot(store: &ChangeAwareStore<u8, i32>) -> BTreeMap<u8, i32> {
    store.iter().map(|(k, v)| (*k, *v)).collect()
}

proptest! {
    /// The captured change set equals a before/after diff of the store.
    #[test]
    fn captured_changes_equal_diff(
        initial in prop::collection::vec((0u8..16, 0i32..4), 0..16),
        ops in prop::collection::vec(op(), 0..40),
    ) {
        let mut store = ChangeAwareStore::new();
        for (k, v) in initial {
            store.add_or_update(k, v);
        }
        store.capture_changes();
        let before = snapshot(&store);

        for op in &ops {
            apply(&mut store, op);
        }
        let after = snapshot(&store);
        let changes = store.capture_changes();

        let mut seen = std::collections::BTreeSet::new();
        for change in &changes {
            let key = *change.key();
            prop_assert!(seen.insert(key), "key {} recorded twice", key);
            match change.reason() {
                ChangeReason::Add => {
                    prop_assert!(!before.contains_key(&key));
                    prop_assert_eq!(after.get(&key), Some(change.current()));
                }
                ChangeReason::Remove => {
                    prop_assert_eq!(before.get(&key), Some(change.current()));
                    prop_assert!(!after.contains_key(&key));
                }
                ChangeReason::Update => {
                    prop_assert_eq!(before.get(&key), change.previous());
                    prop_assert_eq!(after.get(&key), Some(change.current()));
                    prop_assert_ne!(change.previous(), Some(change.current()));
                }
                ChangeReason::Refresh => {
                    prop_assert_eq!(before.get(&key), after.get(&key));
                }
                ChangeReason::Moved => prop_assert!(false, "store never records moves"),
            }
        }

        // Every key whose value differs is covered
        for (key, value) in &after {
            if before.get(key) != Some(value) {
                prop_assert!(seen.contains(key), "missing change for key {}", key);
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                prop_assert!(seen.contains(key), "missing removal for key {}", key);
            }
        }
    }

    /// Rolling back restores the content of the last capture.
    #[test]
    fn rollback_restores_snapshot(
        initial in prop::collection::vec((0u8..16, 0i32..4), 0..16),
        ops in prop::collection::vec(op(), 0..40),
    ) {
        let mut store = ChangeAwareStore::new();
        for (k, v) in initial {
            store.add_or_update(k, v);
        }
        store.capture_changes();
        let before = snapshot(&store);

        for op in &ops {
            apply(&mut store, op);
        }
        store.rollback_pending();

        prop_assert_eq!(snapshot(&store), before);
        prop_assert!(!store.has_pending());
    }

    /// Replaying captured batches onto a mirror keeps it equal to the source.
    #[test]
    fn mirror_tracks_source(batches in prop::collection::vec(prop::collection::vec(op(), 0..10), 1..8)) {
        let mut source = ChangeAwareStore::new();
        let mut mirror = ChangeAwareStore::new();
        for batch in &batches {
            for op in batch {
                apply(&mut source, op);
            }
            mirror.apply_change_set(&source.capture_changes());
            mirror.capture_changes();
            prop_assert_eq!(snapshot(&mirror), snapshot(&source));
        }
    }
}
