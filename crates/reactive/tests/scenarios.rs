//! End-to-end behavior of the cache and its derived views.

mod common;

use cachet_reactive::{
    comparer, predicate, ChangeReason, ChangeSet, ChangeSetKind, ChangeStreamExt, ConnectOptions, Error, Intent,
    ObservableCache, ObservableExt, PageRequest, SortReason, SortedChangeSet, SortedStreamExt, Stream, Subject,
};
use common::{init_tracing, Recorder};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
struct Person {
    name: &'static str,
    age: u32,
}

fn person(name: &'static str, age: u32) -> Person {
    Person { name, age }
}

fn people() -> ObservableCache<&'static str, Person> {
    ObservableCache::with_key_selector(|p: &Person| p.name)
}

#[test]
fn test_add_then_remove_in_one_batch_nets_out() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    let recorder = Recorder::attach(&cache.connect_with(ConnectOptions::new().suppress_empty(false)));

    cache
        .edit(|u| {
            u.add_or_update_keyed("A", 1);
            u.add_or_update_keyed("B", 2);
            u.remove_key(&"A");
            Ok(())
        })
        .unwrap();

    let batches = recorder.values();
    assert_eq!(batches.len(), 2);
    assert!(batches[0].is_empty());
    let batch = &batches[1];
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.adds(), 1);
    assert_eq!(batch.as_slice()[0].key(), &"B");
    assert!(batch.iter().all(|c| *c.key() != "A"));
}

#[test]
fn test_sorted_update_is_a_single_move() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    cache
        .edit_intents(vec![
            Intent::AddOrUpdateKeyed("x", 3),
            Intent::AddOrUpdateKeyed("y", 1),
            Intent::AddOrUpdateKeyed("z", 2),
        ])
        .unwrap();
    let recorder = Recorder::attach(&cache.connect().sort(|a: &i32, b: &i32| a.cmp(b)));

    cache
        .edit(|u| {
            u.add_or_update_keyed("z", 0);
            Ok(())
        })
        .unwrap();

    let sorted: Vec<SortedChangeSet<&str, i32>> = recorder.values();
    assert_eq!(sorted.len(), 2);
    let changes = sorted[1].changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes.moves(), 1);
    assert_eq!(changes.adds() + changes.removes(), 0);
    let moved = &changes.as_slice()[0];
    assert_eq!((moved.previous_index(), moved.current_index()), (Some(1), Some(0)));
    assert_eq!(moved.previous(), Some(&2));
}

#[test]
fn test_suppressed_batch_is_not_delivered() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    cache
        .edit(|u| {
            u.add_or_update_keyed("keep", 1);
            Ok(())
        })
        .unwrap();
    let recorder = Recorder::attach(&cache.connect());
    assert_eq!(recorder.len(), 1);

    cache
        .edit(|u| {
            u.add_or_update_keyed("gone", 2);
            u.remove_key(&"gone");
            Ok(())
        })
        .unwrap();
    assert_eq!(recorder.len(), 1);
}

#[test]
fn test_connect_with_predicate_follows_matched_set() {
    init_tracing();
    let cache = people();
    cache
        .edit(|u| {
            u.add_or_update(person("ann", 31))?;
            u.add_or_update(person("bob", 15))
        })
        .unwrap();
    let recorder = Recorder::attach(&cache.connect_with(ConnectOptions::new().with_filter(|p: &Person| p.age >= 18)));

    cache
        .edit(|u| {
            u.add_or_update(person("bob", 18))?;
            u.add_or_update(person("ann", 32))?;
            u.refresh(&person("ann", 32))
        })
        .unwrap();
    cache
        .edit(|u| {
            u.add_or_update(person("ann", 12))?;
            Ok(())
        })
        .unwrap();

    let batches = recorder.values();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].adds(), 1);
    let second: Vec<_> = batches[1].iter().map(|c| (c.reason(), c.key().to_string())).collect();
    assert_eq!(
        second,
        vec![(ChangeReason::Add, "bob".to_string()), (ChangeReason::Update, "ann".to_string())]
    );
    assert_eq!(batches[2].removes(), 1);
    assert_eq!(batches[2].as_slice()[0].current().age, 32);
}

#[test]
fn test_failed_edit_publishes_nothing() {
    init_tracing();
    let cache = people();
    let recorder = Recorder::attach(&cache.connect_with(ConnectOptions::new().suppress_empty(false)));

    let result = cache.edit(|u| {
        u.add_or_update(person("ann", 31))?;
        u.update("nobody", person("nobody", 1))
    });

    assert!(matches!(result, Err(Error::InvalidOperation { .. })));
    assert!(cache.is_empty());
    assert_eq!(recorder.len(), 1);
}

#[test]
fn test_preview_sees_state_before_batch() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    let observer = cache.clone();
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sizes);
    let _preview = cache.preview().subscribe_next(move |changes: &ChangeSet<&str, i32>| {
        sink.lock().push((changes.len(), observer.len()));
    });

    cache
        .edit(|u| {
            u.add_or_update_keyed("a", 1);
            u.add_or_update_keyed("b", 2);
            Ok(())
        })
        .unwrap();

    assert_eq!(*sizes.lock(), vec![(2, 0)]);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_filter_sort_page_chain() {
    init_tracing();
    let cache = ObservableCache::<u32, u32>::new();
    cache
        .edit(|u| {
            for i in 0..20 {
                u.add_or_update_keyed(i, i);
            }
            Ok(())
        })
        .unwrap();

    let predicates = Subject::new();
    let requests = Subject::new();
    let recorder = Recorder::attach(
        &cache
            .connect()
            .filter_dynamic(predicate(|v: &u32| v % 2 == 0), predicates.clone())
            .sort_dynamic(comparer(|a: &u32, b: &u32| b.cmp(a)), Stream::never())
            .page(PageRequest::new(1, 3).unwrap(), requests.clone()),
    );

    let first = recorder.last().unwrap();
    let keys: Vec<_> = first.items().iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![18, 16, 14]);
    assert_eq!(first.response().pages(), 4);

    requests.next(PageRequest::new(2, 3).unwrap());
    let keys: Vec<_> = recorder.last().unwrap().items().iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![12, 10, 8]);

    // Replacing the predicate flows through as a full refresh
    predicates.next(predicate(|v: &u32| *v >= 10));
    let page = recorder.last().unwrap();
    let keys: Vec<_> = page.items().iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![16, 15, 14]);
    assert_eq!(page.response().total_size(), 10);
    assert!(!page.changes().is_empty());
}

#[test]
fn test_dynamic_sort_reports_comparer_change() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    cache
        .edit(|u| {
            u.add_or_update_keyed("a", 1);
            u.add_or_update_keyed("b", 2);
            u.add_or_update_keyed("c", 3);
            Ok(())
        })
        .unwrap();
    let comparers = Subject::new();
    let recorder = Recorder::attach(
        &cache
            .connect()
            .sort_dynamic(comparer(|a: &i32, b: &i32| a.cmp(b)), comparers.clone()),
    );

    comparers.next(comparer(|a: &i32, b: &i32| b.cmp(a)));

    let last = recorder.last().unwrap();
    assert_eq!(last.reason(), SortReason::ComparerChanged);
    assert_eq!(last.changes().kind(), ChangeSetKind::FullRefresh);
    assert!(last.changes().iter().all(|c| c.reason() == ChangeReason::Moved));
    let values: Vec<_> = last.items().iter().map(|(_, v)| *v).collect();
    assert_eq!(values, vec![3, 2, 1]);
}

#[test]
fn test_fault_is_terminal_and_propagates() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    let recorder = Recorder::attach(
        &cache
            .connect()
            .try_sort(|a: &i32, b: &i32| {
                if *a < 0 || *b < 0 {
                    Err(Error::upstream_fault("negative value"))
                } else {
                    Ok(a.cmp(b))
                }
            })
            .page(PageRequest::default(), Stream::never()),
    );

    cache
        .edit(|u| {
            u.add_or_update_keyed("a", 1);
            u.add_or_update_keyed("b", 2);
            Ok(())
        })
        .unwrap();
    cache
        .edit(|u| {
            u.add_or_update_keyed("c", -1);
            Ok(())
        })
        .unwrap();
    cache
        .edit(|u| {
            u.add_or_update_keyed("d", 4);
            Ok(())
        })
        .unwrap();

    assert!(recorder.is_terminated());
    assert_eq!(recorder.values().len(), 1);
    assert_eq!(recorder.len(), 2);
    // The source cache keeps working
    assert_eq!(cache.len(), 4);
}

#[test]
fn test_observable_cache_from_stream() {
    init_tracing();
    let cache = people();
    cache
        .edit(|u| {
            u.add_or_update(person("ann", 31))?;
            u.add_or_update(person("bob", 15))?;
            u.add_or_update(person("cat", 40))
        })
        .unwrap();

    let names = cache
        .connect()
        .filter(|p: &Person| p.age >= 18)
        .transform(|p: &Person| p.name.to_uppercase())
        .as_observable_cache();
    let mut keys = names.keys();
    keys.sort_unstable();
    assert_eq!(keys, vec!["ann", "cat"]);
    assert_eq!(names.lookup(&"cat"), Some("CAT".to_string()));

    let recorder = Recorder::attach(&names.count_changed());
    cache
        .edit(|u| {
            u.remove(&person("ann", 31))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(recorder.values(), vec![2, 1]);
}

#[test]
fn test_refresh_stays_a_refresh_in_derived_caches() {
    init_tracing();
    let cache = ObservableCache::<&str, i32>::new();
    cache
        .edit(|u| {
            u.add_or_update_keyed("a", 1);
            u.add_or_update_keyed("b", 2);
            Ok(())
        })
        .unwrap();

    let mirror = cache.connect().as_observable_cache();
    let mirrored = Recorder::attach(&mirror.connect());

    let groups = Recorder::attach(&cache.connect().group_by(|v: &i32| *v % 2));
    let odd = groups.values()[0]
        .iter()
        .find(|c| *c.key() == 1)
        .map(|c| c.current().clone())
        .unwrap();
    let odd_members = Recorder::attach(&odd.connect());

    cache.edit_intents(vec![Intent::RefreshKey("a")]).unwrap();

    let reasons = |batches: Vec<ChangeSet<&'static str, i32>>| -> Vec<Vec<ChangeReason>> {
        batches.iter().map(|b| b.iter().map(|c| c.reason()).collect()).collect()
    };
    assert_eq!(
        reasons(mirrored.values()),
        vec![vec![ChangeReason::Add, ChangeReason::Add], vec![ChangeReason::Refresh]]
    );
    assert_eq!(
        reasons(odd_members.values()),
        vec![vec![ChangeReason::Add], vec![ChangeReason::Refresh]]
    );
    // A member refresh is not a group-level event
    assert_eq!(groups.len(), 1);
}
