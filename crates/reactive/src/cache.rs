//! Observable cache.
//!
//! `ObservableCache` owns a `ChangeAwareStore` and fans its captured change
//! sets out to subscribers. Every edit runs inside one exclusive section
//! per cache: mutate the store, capture the change set, notify preview
//! subscribers (before the store is replaced) and then post subscribers.
//!
//! # Re-entrancy
//!
//! The thread running the exclusive section is recorded as its owner. An
//! edit issued by the owner, which can only happen from inside a
//! notification handler, is queued instead of taking the lock again. The
//! outermost call drains the queue after its own delivery finished, so
//! every subscriber sees batches in the order they were applied. Queued
//! edits report `Ok` when queued; a queued edit that fails later is logged
//! and rolled back.
//!
//! The edit closure must read and write through the `Updater` it is given
//! (`Updater::lookup` for reads) and not call back into the same cache.
//! Without preview subscribers the closure runs while the store is locked
//! and such a call deadlocks; with preview subscribers it runs against a
//! copy and the call sees the content before the batch.

use crate::config::{CacheBuilder, CacheConfig, ConnectOptions};
use crate::emitter::Emitter;
use crate::observable::{listener, Listener, Notification, Observable, ObservableExt, Stream};
use crate::scheduler::Scheduler;
use crate::subscription::{Delivery, SubscriberSet, Subscription};
use crate::watch::Watchers;
use cachet_core::{Change, ChangeSet, Error, Result};
use cachet_incremental::{Filter, Predicate};
use cachet_storage::{ChangeAwareStore, Equality, Intent, KeySelector, Updater};
use core::hash::Hash;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Bounds required of cache keys.
pub trait CacheKey: Eq + Hash + Clone + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> CacheKey for T {}

/// Bounds required of cache values.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

type QueuedEdit<K, V> = Box<dyn FnOnce(&mut Updater<'_, K, V>) -> Result<()> + Send>;

struct State<K, V> {
    store: ChangeAwareStore<K, V>,
    completed: bool,
}

struct Inner<K, V> {
    state: Mutex<State<K, V>>,
    watchers: Mutex<Watchers<K, V>>,
    key_selector: Option<KeySelector<K, V>>,
    config: CacheConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
    /// Exclusive section of edits and registrations
    edit_lock: Mutex<()>,
    /// Thread currently inside the exclusive section
    owner: Mutex<Option<ThreadId>>,
    queued: Mutex<VecDeque<QueuedEdit<K, V>>>,
    connections: SubscriberSet<ChangeSet<K, V>>,
    previews: SubscriberSet<ChangeSet<K, V>>,
    counts: SubscriberSet<usize>,
    /// Source feeding a mirror cache
    upstream: Mutex<Option<Subscription>>,
}

/// A keyed cache that publishes its changes.
///
/// Handles are cheap to clone and share one cache.
pub struct ObservableCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ObservableCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> core::fmt::Debug for ObservableCache<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObservableCache")
            .field("subscribers", &self.inner.connections.len())
            .finish_non_exhaustive()
    }
}

/// A non-owning handle to an observable cache.
pub struct WeakObservableCache<K, V> {
    inner: Weak<Inner<K, V>>,
}

impl<K, V> Clone for WeakObservableCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V> WeakObservableCache<K, V> {
    /// Returns the cache if it is still alive.
    pub fn upgrade(&self) -> Option<ObservableCache<K, V>> {
        self.inner.upgrade().map(|inner| ObservableCache { inner })
    }
}

fn completed_error() -> Error {
    Error::invalid_operation("the cache has been completed")
}

fn terminal<T>(error: &Option<Error>) -> Notification<T> {
    match error {
        Some(error) => Notification::Error(error.clone()),
        None => Notification::Completed,
    }
}

struct OwnerGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

impl<K: CacheKey, V: CacheValue + PartialEq> ObservableCache<K, V> {
    /// Creates an empty cache in keyed mode.
    pub fn new() -> Self {
        CacheBuilder::new().build()
    }

    /// Creates an empty cache in source mode, deriving keys from values.
    pub fn with_key_selector<F>(key_selector: F) -> Self
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        CacheBuilder::new().key_selector(key_selector).build()
    }
}

impl<K: CacheKey, V: CacheValue + PartialEq> Default for ObservableCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> ObservableCache<K, V> {
    /// Starts a builder.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_parts(
        config: CacheConfig,
        equality: Equality<V>,
        key_selector: Option<KeySelector<K, V>>,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Self {
        let mut store = ChangeAwareStore::with_equality(equality);
        store.reserve(config.initial_capacity);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    store,
                    completed: false,
                }),
                watchers: Mutex::new(Watchers::default()),
                key_selector,
                config,
                scheduler,
                edit_lock: Mutex::new(()),
                owner: Mutex::new(None),
                queued: Mutex::new(VecDeque::new()),
                connections: SubscriberSet::new(),
                previews: SubscriberSet::new(),
                counts: SubscriberSet::new(),
                upstream: Mutex::new(None),
            }),
        }
    }

    /// Creates a cache that replays another cache's change sets verbatim.
    ///
    /// Every update is recorded: the source already decided what changed.
    pub(crate) fn mirror() -> Self {
        CacheBuilder::new().build_with_equality(Arc::new(|_: &V, _: &V| false))
    }

    /// Returns true if both handles share one cache.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a non-owning handle.
    pub fn downgrade(&self) -> WeakObservableCache<K, V> {
        WeakObservableCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the configuration of this cache.
    #[inline]
    pub fn config(&self) -> CacheConfig {
        self.inner.config
    }

    /// Applies one batch of edits.
    ///
    /// Every mutation made through the updater is published as a single
    /// change set. If the closure returns an error, all of its mutations are
    /// rolled back and nothing is published.
    ///
    /// Read the current content with `Updater::lookup`; the closure must not
    /// call back into this cache (see the module docs).
    pub fn edit<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Updater<'_, K, V>) -> Result<()> + Send + 'static,
    {
        self.inner.edit(Box::new(edit))
    }

    /// Applies an ordered sequence of intents as one batch.
    pub fn edit_intents<I>(&self, intents: I) -> Result<()>
    where
        I: IntoIterator<Item = Intent<K, V>>,
    {
        let intents: Vec<Intent<K, V>> = intents.into_iter().collect();
        self.edit(move |updater| updater.apply(intents))
    }

    /// Replays a change set produced elsewhere as one batch.
    pub fn apply_change_set(&self, changes: ChangeSet<K, V>) -> Result<()> {
        self.edit(move |updater| {
            updater.apply_change_set(&changes);
            Ok(())
        })
    }

    /// Looks up the current value of a key.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.inner.state.lock().store.lookup(key).cloned()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().store.is_empty()
    }

    /// Returns a snapshot of every entry.
    pub fn items(&self) -> Vec<(K, V)> {
        let state = self.inner.state.lock();
        state.store.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Returns a snapshot of every key.
    pub fn keys(&self) -> Vec<K> {
        self.inner.state.lock().store.keys().cloned().collect()
    }

    /// Returns the number of live watchers of a key.
    pub fn watch_count(&self, key: &K) -> usize {
        self.inner.watchers.lock().count(key)
    }

    /// Returns the number of live connections.
    pub fn subscriber_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Returns true once the cache was completed or faulted.
    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    /// Connects to every change, starting with the current content.
    pub fn connect(&self) -> Stream<ChangeSet<K, V>> {
        self.connect_with(ConnectOptions::default())
    }

    /// Connects with a predicate and suppression override.
    ///
    /// The first batch of every subscription adds the matching entries
    /// present at subscription time. Later batches follow the matched-set
    /// rule: entering the predicate is an add, leaving it is a remove.
    pub fn connect_with(&self, options: ConnectOptions<V>) -> Stream<ChangeSet<K, V>> {
        let inner = Arc::clone(&self.inner);
        let stream = Stream::create(move |downstream: Listener<ChangeSet<K, V>>| {
            inner.connect(options.clone(), downstream)
        });
        match &self.inner.scheduler {
            Some(scheduler) => stream.observe_on(Arc::clone(scheduler)),
            None => stream,
        }
    }

    /// Observes each batch before it is applied to the store.
    ///
    /// While any preview subscriber is connected, every edit is applied to a
    /// copy of the store that then replaces it, which costs a full copy
    /// (O(n)) per edit. Edits go back to updating in place once the last
    /// preview subscriber leaves.
    pub fn preview(&self) -> Stream<ChangeSet<K, V>> {
        self.preview_with(None)
    }

    /// Observes batches before they are applied, filtered by `predicate`.
    ///
    /// Has the same per-edit copy cost as `preview`.
    pub fn preview_with(&self, predicate: Option<Predicate<V>>) -> Stream<ChangeSet<K, V>> {
        let inner = Arc::clone(&self.inner);
        Stream::create(move |downstream: Listener<ChangeSet<K, V>>| {
            inner.preview(predicate.clone(), downstream)
        })
    }

    /// Observes one key: an add of its current value if present, then every
    /// later change of that key.
    pub fn watch(&self, key: K) -> Stream<Change<K, V>> {
        let inner = Arc::clone(&self.inner);
        Stream::create(move |downstream: Listener<Change<K, V>>| inner.watch(key.clone(), downstream))
    }

    /// Observes the number of entries: the current count, then every change.
    pub fn count_changed(&self) -> Stream<usize> {
        let inner = Arc::clone(&self.inner);
        Stream::create(move |downstream: Listener<usize>| inner.count_changed(downstream))
    }

    /// Terminates every stream of this cache normally. Later edits fail.
    pub fn complete(&self) {
        self.inner.terminate(None);
    }

    /// Terminates every stream of this cache with a fault.
    pub(crate) fn fail(&self, error: Error) {
        self.inner.terminate(Some(error));
    }

    /// Keeps the subscription feeding this cache alive as long as the cache.
    pub(crate) fn attach(&self, upstream: Subscription) {
        *self.inner.upstream.lock() = Some(upstream);
    }
}

impl<K: CacheKey, V: CacheValue> Observable<ChangeSet<K, V>> for ObservableCache<K, V> {
    fn subscribe(&self, listener: Listener<ChangeSet<K, V>>) -> Subscription {
        self.connect().subscribe(listener)
    }
}

impl<K: CacheKey, V: CacheValue> Inner<K, V> {
    fn is_reentrant(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Runs `f` inside the exclusive section, then drains queued edits.
    /// Called by the owner, `f` runs directly.
    fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_reentrant() {
            return f();
        }
        let _serial = self.edit_lock.lock();
        *self.owner.lock() = Some(thread::current().id());
        let _owner = OwnerGuard { owner: &self.owner };
        let result = f();
        self.drain_queued();
        result
    }

    fn edit(&self, edit: QueuedEdit<K, V>) -> Result<()> {
        if self.is_reentrant() {
            if self.state.lock().completed {
                return Err(completed_error());
            }
            self.queued.lock().push_back(edit);
            tracing::trace!("re-entrant edit queued");
            return Ok(());
        }
        self.exclusive(|| self.run_edit(edit))
    }

    fn drain_queued(&self) {
        loop {
            let Some(edit) = self.queued.lock().pop_front() else {
                break;
            };
            if let Err(error) = self.run_edit(edit) {
                tracing::warn!(%error, "queued edit failed and was rolled back");
            }
        }
    }

    /// Runs an edit against `store` and captures its net effect.
    fn apply(&self, store: &mut ChangeAwareStore<K, V>, edit: QueuedEdit<K, V>) -> Result<ChangeSet<K, V>> {
        let result = {
            let mut updater = match &self.key_selector {
                Some(key_selector) => Updater::with_key_selector(store, key_selector),
                None => Updater::new(store),
            };
            edit(&mut updater)
        };
        match result {
            Ok(()) => Ok(store.capture_changes()),
            Err(error) => {
                store.rollback_pending();
                Err(error)
            }
        }
    }

    fn run_edit(&self, edit: QueuedEdit<K, V>) -> Result<()> {
        let previews = self.previews.snapshot();
        let mut published = if previews.is_empty() {
            let mut state = self.state.lock();
            if state.completed {
                return Err(completed_error());
            }
            let before = state.store.len();
            let changes = self.apply(&mut state.store, edit)?;
            Published::capture(self, state, changes, before)
        } else {
            // Edit a copy so preview subscribers observe the batch while the
            // store still holds the previous content.
            let (mut working, before) = {
                let state = self.state.lock();
                if state.completed {
                    return Err(completed_error());
                }
                (state.store.clone(), state.store.len())
            };
            let changes = self.apply(&mut working, edit)?;
            previews.next(changes.clone());

            let mut state = self.state.lock();
            state.store = working;
            Published::capture(self, state, changes, before)
        };
        published.publish();
        Ok(())
    }

    fn connect(&self, options: ConnectOptions<V>, downstream: Listener<ChangeSet<K, V>>) -> Subscription {
        let suppress_empty = options
            .suppress_empty
            .unwrap_or(self.config.suppress_empty_change_sets);
        let emitter = Arc::new(Emitter::new(downstream));
        let filter = options.predicate.map(|p| Arc::new(Mutex::new(Filter::new(p))));

        self.exclusive(|| {
            let (initial, registration) = {
                let state = self.state.lock();
                if state.completed {
                    drop(state);
                    emitter.emit(Notification::Completed);
                    return Subscription::empty();
                }
                let initial: ChangeSet<K, V> = state
                    .store
                    .iter()
                    .map(|(k, v)| Change::add(k.clone(), v.clone()))
                    .collect();
                let initial = match &filter {
                    Some(filter) => filter.lock().process(&initial),
                    None => Ok(initial),
                };
                let forward = connection(Arc::clone(&emitter), filter.clone(), suppress_empty);
                (initial, self.connections.insert(forward))
            };
            tracing::debug!(subscribers = self.connections.len(), "connected");

            match initial {
                Ok(initial) if suppress_empty && initial.is_empty() => {}
                Ok(initial) => emitter.next(initial),
                Err(error) => {
                    tracing::error!(%error, "connection predicate faulted");
                    emitter.emit(Notification::Error(error));
                }
            }
            registration
        })
    }

    fn preview(&self, predicate: Option<Predicate<V>>, downstream: Listener<ChangeSet<K, V>>) -> Subscription {
        let emitter = Arc::new(Emitter::new(downstream));
        let suppress_empty = self.config.suppress_empty_change_sets;

        self.exclusive(|| {
            let state = self.state.lock();
            if state.completed {
                drop(state);
                emitter.emit(Notification::Completed);
                return Subscription::empty();
            }
            // Seed the matched set with the current content without emitting
            let filter = match predicate {
                Some(predicate) => {
                    let mut filter = Filter::new(predicate);
                    let seed: ChangeSet<K, V> = state
                        .store
                        .iter()
                        .map(|(k, v)| Change::add(k.clone(), v.clone()))
                        .collect();
                    if let Err(error) = filter.process(&seed) {
                        drop(state);
                        emitter.emit(Notification::Error(error));
                        return Subscription::empty();
                    }
                    Some(Arc::new(Mutex::new(filter)))
                }
                None => None,
            };
            let registration = self.previews.insert(connection(Arc::clone(&emitter), filter, suppress_empty));
            drop(state);
            tracing::debug!(subscribers = self.previews.len(), "preview connected");
            registration
        })
    }

    fn watch(self: &Arc<Self>, key: K, downstream: Listener<Change<K, V>>) -> Subscription {
        let emitter = Arc::new(Emitter::new(downstream));

        self.exclusive(|| {
            let (registration, latest) = {
                let state = self.state.lock();
                if state.completed {
                    drop(state);
                    emitter.emit(Notification::Completed);
                    return Subscription::empty();
                }
                let current = state.store.lookup(&key).cloned();
                let forward = {
                    let emitter = Arc::clone(&emitter);
                    listener(move |notification: &Notification<Change<K, V>>| emitter.emit(notification.clone()))
                };
                self.watchers.lock().insert(key.clone(), current, forward)
            };
            if let Some(value) = latest {
                emitter.next(Change::add(key.clone(), value));
            }

            let inner = Arc::downgrade(self);
            Subscription::new(move || {
                if let Some(inner) = inner.upgrade() {
                    if inner.watchers.lock().release(&key, registration) {
                        tracing::debug!("watch torn down");
                    }
                }
            })
        })
    }

    fn count_changed(&self, downstream: Listener<usize>) -> Subscription {
        let emitter = Arc::new(Emitter::new(downstream));

        self.exclusive(|| {
            let (count, registration) = {
                let state = self.state.lock();
                if state.completed {
                    drop(state);
                    emitter.emit(Notification::Completed);
                    return Subscription::empty();
                }
                let forward = {
                    let emitter = Arc::clone(&emitter);
                    listener(move |notification: &Notification<usize>| emitter.emit(notification.clone()))
                };
                (state.store.len(), self.counts.insert(forward))
            };
            emitter.next(count);
            registration
        })
    }

    fn terminate(&self, error: Option<Error>) {
        let upstream = self.exclusive(|| {
            {
                let mut state = self.state.lock();
                if state.completed {
                    return None;
                }
                state.completed = true;
            }
            match &error {
                Some(error) => tracing::error!(%error, "cache faulted"),
                None => tracing::debug!("cache completed"),
            }

            let watchers = self.watchers.lock().drain();
            self.connections.drain().deliver(&terminal(&error));
            self.previews.drain().deliver(&terminal(&error));
            self.counts.drain().deliver(&terminal(&error));
            for delivery in watchers {
                delivery.deliver(&terminal(&error));
            }
            self.upstream.lock().take()
        });
        drop(upstream);
    }
}

/// Forwards raw batches to one subscriber through its own matched-set
/// filter and emitter.
fn connection<K, V>(
    emitter: Arc<Emitter<ChangeSet<K, V>>>,
    filter: Option<Arc<Mutex<Filter<K, V>>>>,
    suppress_empty: bool,
) -> Listener<ChangeSet<K, V>>
where
    K: CacheKey,
    V: CacheValue,
{
    listener(move |notification: &Notification<ChangeSet<K, V>>| {
        let Notification::Next(changes) = notification else {
            if let Some(terminal) = notification.terminal() {
                emitter.emit(terminal);
            }
            return;
        };
        let drain = match &filter {
            Some(filter) => {
                let mut filter = filter.lock();
                match filter.process(changes) {
                    Ok(filtered) => push_batch(&emitter, filtered, suppress_empty),
                    Err(error) => {
                        tracing::error!(%error, "connection predicate faulted");
                        emitter.push(Notification::Error(error))
                    }
                }
            }
            None => push_batch(&emitter, changes.clone(), suppress_empty),
        };
        if drain {
            emitter.drain();
        }
    })
}

fn push_batch<K, V>(emitter: &Emitter<ChangeSet<K, V>>, changes: ChangeSet<K, V>, suppress_empty: bool) -> bool {
    if suppress_empty && changes.is_empty() {
        return false;
    }
    emitter.push(Notification::Next(changes))
}

/// Deliveries of one applied batch, captured while the store was locked.
struct Published<K, V> {
    changes: ChangeSet<K, V>,
    connections: Delivery<ChangeSet<K, V>>,
    watchers: Vec<(Delivery<Change<K, V>>, Change<K, V>)>,
    count: Option<(Delivery<usize>, usize)>,
}

impl<K: CacheKey, V: CacheValue> Published<K, V> {
    fn capture(
        inner: &Inner<K, V>,
        state: parking_lot::MutexGuard<'_, State<K, V>>,
        changes: ChangeSet<K, V>,
        before: usize,
    ) -> Self {
        let after = state.store.len();
        let connections = inner.connections.snapshot();
        let watchers = inner.watchers.lock().collect(&changes);
        let count = (before != after).then(|| (inner.counts.snapshot(), after));
        drop(state);
        Self {
            changes,
            connections,
            watchers,
            count,
        }
    }

    fn publish(&mut self) {
        let changes = core::mem::take(&mut self.changes);
        tracing::debug!(
            adds = changes.adds(),
            updates = changes.updates(),
            removes = changes.removes(),
            refreshes = changes.refreshes(),
            "edit applied"
        );
        tracing::trace!(subscribers = self.connections.len(), "delivering change set");
        self.connections.next(changes);
        for (delivery, change) in self.watchers.drain(..) {
            delivery.next(change);
        }
        if let Some((delivery, count)) = self.count.take() {
            delivery.next(count);
        }
    }
}
