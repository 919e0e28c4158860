//! Stream wiring of the derived view operators.
//!
//! Every operator here is cold: each subscription owns a fresh instance of
//! the incremental operator from `cachet_incremental`, fed by the upstream
//! change stream and, for the `*_dynamic` variants, by a parameter stream.
//! Both inputs update the same state under one lock and emit through one
//! serialized emitter, so output batches are ordered exactly like the state
//! changes that produced them.
//!
//! A fault while evaluating a predicate, comparer, selector or transform is
//! delivered once as `Notification::Error` and ends the stream. Completion of
//! a parameter stream is ignored; its faults are forwarded.

use crate::cache::{CacheKey, CacheValue, ObservableCache};
use crate::emitter::Emitter;
use crate::group::{group_stream, Group};
use crate::observable::{listener, Listener, Notification, Observable, Stream};
use cachet_core::{ChangeSet, Error, Result};
use cachet_incremental::{
    comparer, group_selector, predicate, transformer, try_comparer, try_group_selector, try_predicate,
    try_transformer, ChangeSummary, Comparer, Diagnostics, Filter, GroupSelector, Page, PageRequest, PageResponse,
    PagedChangeSet, Predicate, Sort, SortReason, SortedChangeSet, Transform, Transformer, VirtualChangeSet,
    VirtualRequest, VirtualResponse, Virtualize,
};
use core::cmp::Ordering;
use core::hash::Hash;
use parking_lot::Mutex;
use std::sync::Arc;

/// Operator state plus the emitter of one subscription.
pub(crate) struct Operator<S, U> {
    state: Mutex<S>,
    emitter: Emitter<U>,
}

impl<S, U> Operator<S, U> {
    pub(crate) fn new(state: S, downstream: Listener<U>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            emitter: Emitter::new(downstream),
        })
    }

    /// Runs one step against the state and queues its output under the
    /// state lock; delivery happens after the lock is released.
    pub(crate) fn step(&self, f: impl FnOnce(&mut S) -> Result<Option<U>>) {
        if self.emitter.is_terminated() {
            return;
        }
        let drain = {
            let mut state = self.state.lock();
            match f(&mut state) {
                Ok(Some(out)) => self.emitter.push(Notification::Next(out)),
                Ok(None) => false,
                Err(error) => {
                    tracing::error!(%error, "operator faulted");
                    self.emitter.push(Notification::Error(error))
                }
            }
        };
        if drain {
            self.emitter.drain();
        }
    }

    /// Feeds one notification of the data stream.
    pub(crate) fn on_data<T>(&self, notification: &Notification<T>, f: impl FnOnce(&mut S, &T) -> Result<Option<U>>) {
        match notification {
            Notification::Next(value) => self.step(|state| f(state, value)),
            other => {
                if let Some(terminal) = other.terminal() {
                    self.emitter.emit(terminal);
                }
            }
        }
    }

    /// Feeds one notification of a parameter stream.
    pub(crate) fn on_parameter<P>(
        &self,
        notification: &Notification<P>,
        f: impl FnOnce(&mut S, &P) -> Result<Option<U>>,
    ) {
        match notification {
            Notification::Next(parameter) => self.step(|state| f(state, parameter)),
            Notification::Error(error) => self.emitter.emit(Notification::Error(error.clone())),
            Notification::Completed => {}
        }
    }

    /// Delivers a terminal notification directly.
    pub(crate) fn terminate(&self, notification: Notification<U>) {
        self.emitter.emit(notification);
    }
}

/// Wires a stateful step between an upstream and each subscriber.
pub(crate) fn unary<T, U, S, I, F>(upstream: impl Observable<T> + 'static, init: I, step: F) -> Stream<U>
where
    T: 'static,
    U: Send + 'static,
    S: Send + 'static,
    I: Fn() -> S + Send + Sync + 'static,
    F: Fn(&mut S, &T) -> Result<Option<U>> + Send + Sync + 'static,
{
    let step = Arc::new(step);
    Stream::create(move |downstream: Listener<U>| {
        let operator = Operator::new(init(), downstream);
        let step = Arc::clone(&step);
        upstream.subscribe(listener(move |notification: &Notification<T>| {
            operator.on_data(notification, |state, value| step(state, value));
        }))
    })
}

/// Like `unary`, with a second stream replacing the operator's parameter.
pub(crate) fn dynamic<T, P, U, S, I, F, R>(
    upstream: impl Observable<T> + 'static,
    parameters: impl Observable<P> + 'static,
    init: I,
    step: F,
    reset: R,
) -> Stream<U>
where
    T: 'static,
    P: 'static,
    U: Send + 'static,
    S: Send + 'static,
    I: Fn() -> S + Send + Sync + 'static,
    F: Fn(&mut S, &T) -> Result<Option<U>> + Send + Sync + 'static,
    R: Fn(&mut S, &P) -> Result<Option<U>> + Send + Sync + 'static,
{
    let step = Arc::new(step);
    let reset = Arc::new(reset);
    Stream::create(move |downstream: Listener<U>| {
        let operator = Operator::new(init(), downstream);
        let data = {
            let operator = Arc::clone(&operator);
            let step = Arc::clone(&step);
            upstream.subscribe(listener(move |notification: &Notification<T>| {
                operator.on_data(notification, |state, value| step(state, value));
            }))
        };
        let reset = Arc::clone(&reset);
        let parameter = parameters.subscribe(listener(move |notification: &Notification<P>| {
            operator.on_parameter(notification, |state, value| reset(state, value));
        }));
        data.with(parameter)
    })
}

fn non_empty<K, V>(changes: ChangeSet<K, V>) -> Option<ChangeSet<K, V>> {
    (!changes.is_empty()).then_some(changes)
}

/// Derived views over a stream of keyed change sets.
pub trait ChangeStreamExt<K: CacheKey, V: CacheValue>: Observable<ChangeSet<K, V>> + Sized + 'static {
    /// Keeps the items matching `f`, following the matched-set rule.
    fn filter<F>(self, f: F) -> Stream<ChangeSet<K, V>>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        filter_stream(self, predicate(f))
    }

    /// Keeps the items matching a fallible predicate.
    fn try_filter<F>(self, f: F) -> Stream<ChangeSet<K, V>>
    where
        F: Fn(&V) -> Result<bool> + Send + Sync + 'static,
    {
        filter_stream(self, try_predicate(f))
    }

    /// Filters with a predicate that `predicates` may replace. A
    /// replacement re-evaluates every item and emits a full refresh holding
    /// only the matched-set differences.
    fn filter_dynamic<P>(self, initial: Predicate<V>, predicates: P) -> Stream<ChangeSet<K, V>>
    where
        P: Observable<Predicate<V>> + 'static,
    {
        dynamic(
            self,
            predicates,
            move || Filter::new(Arc::clone(&initial)),
            |filter: &mut Filter<K, V>, changes: &ChangeSet<K, V>| filter.process(changes).map(non_empty),
            |filter: &mut Filter<K, V>, predicate: &Predicate<V>| {
                tracing::debug!("predicate replaced");
                filter.set_predicate(Arc::clone(predicate)).map(non_empty)
            },
        )
    }

    /// Sorts by `f`. Ties keep arrival order.
    fn sort<F>(self, f: F) -> Stream<SortedChangeSet<K, V>>
    where
        F: Fn(&V, &V) -> Ordering + Send + Sync + 'static,
    {
        sort_stream(self, comparer(f))
    }

    /// Sorts by a fallible comparer.
    fn try_sort<F>(self, f: F) -> Stream<SortedChangeSet<K, V>>
    where
        F: Fn(&V, &V) -> Result<Ordering> + Send + Sync + 'static,
    {
        sort_stream(self, try_comparer(f))
    }

    /// Sorts with a comparer that `comparers` may replace. A replacement
    /// emits one move per item whose position changed.
    fn sort_dynamic<C>(self, initial: Comparer<V>, comparers: C) -> Stream<SortedChangeSet<K, V>>
    where
        C: Observable<Comparer<V>> + 'static,
    {
        dynamic(
            self,
            comparers,
            move || Sort::new(Arc::clone(&initial)),
            sort_step::<K, V>,
            |sort: &mut Sort<K, V>, comparer: &Comparer<V>| {
                tracing::debug!("comparer replaced");
                sort.set_comparer(Arc::clone(comparer)).map(Some)
            },
        )
    }

    /// Groups items by the key `f` derives. Each group exposes a child
    /// cache holding its members.
    fn group_by<G, F>(self, f: F) -> Stream<ChangeSet<G, Group<K, V, G>>>
    where
        G: CacheKey,
        F: Fn(&V) -> G + Send + Sync + 'static,
    {
        group_stream(self, group_selector(f), Stream::never())
    }

    /// Groups items by a fallible selector.
    fn try_group_by<G, F>(self, f: F) -> Stream<ChangeSet<G, Group<K, V, G>>>
    where
        G: CacheKey,
        F: Fn(&V) -> Result<G> + Send + Sync + 'static,
    {
        group_stream(self, try_group_selector(f), Stream::never())
    }

    /// Groups with a selector that `selectors` may replace. A replacement
    /// regroups every item.
    fn group_by_dynamic<G, S>(self, initial: GroupSelector<V, G>, selectors: S) -> Stream<ChangeSet<G, Group<K, V, G>>>
    where
        G: CacheKey,
        S: Observable<GroupSelector<V, G>> + 'static,
    {
        group_stream(self, initial, selectors)
    }

    /// Maps every value, keeping reasons and indices.
    fn transform<U, F>(self, f: F) -> Stream<ChangeSet<K, U>>
    where
        U: CacheValue,
        F: Fn(&V) -> U + Send + Sync + 'static,
    {
        transform_stream(self, transformer(f))
    }

    /// Maps every value with a fallible transform.
    fn try_transform<U, F>(self, f: F) -> Stream<ChangeSet<K, U>>
    where
        U: CacheValue,
        F: Fn(&V) -> Result<U> + Send + Sync + 'static,
    {
        transform_stream(self, try_transformer(f))
    }

    /// Emits running statistics after every batch. A fault is counted and
    /// reported in one last summary before it is forwarded.
    fn collect_diagnostics(self) -> Stream<ChangeSummary> {
        Stream::create(move |downstream: Listener<ChangeSummary>| {
            let operator = Operator::new(Diagnostics::new(), downstream);
            self.subscribe(listener(move |notification: &Notification<ChangeSet<K, V>>| match notification {
                Notification::Next(changes) => {
                    operator.step(|diagnostics| Ok(Some(diagnostics.apply(changes).clone())));
                }
                Notification::Error(error) => {
                    operator.step(|diagnostics| Ok(Some(diagnostics.record_error(error).clone())));
                    operator.terminate(Notification::Error(error.clone()));
                }
                Notification::Completed => operator.terminate(Notification::Completed),
            }))
        })
    }

    /// Materializes the stream into a cache that mirrors it. The cache owns
    /// the upstream subscription and completes or faults with it.
    fn as_observable_cache(self) -> ObservableCache<K, V> {
        let mirror = ObservableCache::mirror();
        let target = mirror.downgrade();
        let upstream = self.subscribe(listener(move |notification: &Notification<ChangeSet<K, V>>| {
            let Some(mirror) = target.upgrade() else {
                return;
            };
            match notification {
                Notification::Next(changes) => {
                    if let Err(error) = mirror.apply_change_set(changes.clone()) {
                        let fault = Error::upstream_fault(format!("mirror rejected change set: {error}"));
                        tracing::error!(%fault, "mirror faulted");
                        mirror.fail(fault);
                    }
                }
                Notification::Error(error) => mirror.fail(error.clone()),
                Notification::Completed => mirror.complete(),
            }
        }));
        mirror.attach(upstream);
        mirror
    }

    /// Drops empty change sets.
    fn suppress_empty(self) -> Stream<ChangeSet<K, V>> {
        unary(self, || (), |_: &mut (), changes: &ChangeSet<K, V>| Ok(non_empty(changes.clone())))
    }
}

impl<K, V, O> ChangeStreamExt<K, V> for O
where
    K: CacheKey,
    V: CacheValue,
    O: Observable<ChangeSet<K, V>> + 'static,
{
}

fn filter_stream<K, V>(upstream: impl Observable<ChangeSet<K, V>> + 'static, predicate: Predicate<V>) -> Stream<ChangeSet<K, V>>
where
    K: CacheKey,
    V: CacheValue,
{
    unary(
        upstream,
        move || Filter::new(Arc::clone(&predicate)),
        |filter: &mut Filter<K, V>, changes: &ChangeSet<K, V>| filter.process(changes).map(non_empty),
    )
}

fn sort_step<K, V>(sort: &mut Sort<K, V>, changes: &ChangeSet<K, V>) -> Result<Option<SortedChangeSet<K, V>>>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    let sorted = sort.process(changes)?;
    Ok((!sorted.is_empty() || sorted.reason() == SortReason::InitialLoad).then_some(sorted))
}

fn sort_stream<K, V>(upstream: impl Observable<ChangeSet<K, V>> + 'static, comparer: Comparer<V>) -> Stream<SortedChangeSet<K, V>>
where
    K: CacheKey,
    V: CacheValue,
{
    unary(upstream, move || Sort::new(Arc::clone(&comparer)), sort_step::<K, V>)
}

fn transform_stream<K, V, U>(
    upstream: impl Observable<ChangeSet<K, V>> + 'static,
    transformer: Transformer<V, U>,
) -> Stream<ChangeSet<K, U>>
where
    K: CacheKey,
    V: CacheValue,
    U: CacheValue,
{
    unary(
        upstream,
        move || Transform::new(Arc::clone(&transformer)),
        |transform: &mut Transform<K, V, U>, changes: &ChangeSet<K, V>| transform.process(changes).map(non_empty),
    )
}

/// Windows over a sorted change stream.
pub trait SortedStreamExt<K: CacheKey, V: CacheValue>: Observable<SortedChangeSet<K, V>> + Sized + 'static {
    /// Shows one page of the sorted view. `requests` moves to other pages.
    ///
    /// A batch is emitted when the page content or its response changed.
    fn page<R>(self, initial: PageRequest, requests: R) -> Stream<PagedChangeSet<K, V>>
    where
        R: Observable<PageRequest> + 'static,
    {
        dynamic(
            self,
            requests,
            move || (Page::new(initial), None::<PageResponse>),
            |(page, last): &mut (Page<K, V>, Option<PageResponse>), sorted: &SortedChangeSet<K, V>| {
                let out = page.process(sorted);
                let changed = last.replace(out.response()) != Some(out.response());
                Ok((changed || !out.changes().is_empty()).then_some(out))
            },
            |(page, last): &mut (Page<K, V>, Option<PageResponse>), request: &PageRequest| {
                let out = page.set_request(*request);
                *last = Some(out.response());
                Ok(Some(out))
            },
        )
    }

    /// Shows an index window of the sorted view. `requests` moves it.
    fn virtualize<R>(self, initial: VirtualRequest, requests: R) -> Stream<VirtualChangeSet<K, V>>
    where
        R: Observable<VirtualRequest> + 'static,
    {
        dynamic(
            self,
            requests,
            move || (Virtualize::new(initial), None::<VirtualResponse>),
            |(window, last): &mut (Virtualize<K, V>, Option<VirtualResponse>), sorted: &SortedChangeSet<K, V>| {
                let out = window.process(sorted);
                let changed = last.replace(out.response()) != Some(out.response());
                Ok((changed || !out.changes().is_empty()).then_some(out))
            },
            |(window, last): &mut (Virtualize<K, V>, Option<VirtualResponse>), request: &VirtualRequest| {
                let out = window.set_request(*request);
                *last = Some(out.response());
                Ok(Some(out))
            },
        )
    }
}

impl<K, V, O> SortedStreamExt<K, V> for O
where
    K: CacheKey,
    V: CacheValue,
    O: Observable<SortedChangeSet<K, V>> + 'static,
{
}
