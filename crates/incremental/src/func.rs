//! Shared function types for operator parameters.
//!
//! Operator parameters are always stored in their fallible form so a fault
//! raised while evaluating one item can be surfaced as an error instead of
//! being dropped. The infallible constructors wrap a plain closure.

use cachet_core::Result;
use core::cmp::Ordering;
use std::sync::Arc;

/// A predicate deciding whether a value is part of a filtered view.
pub type Predicate<V> = Arc<dyn Fn(&V) -> Result<bool> + Send + Sync>;

/// A comparer defining the order of a sorted view.
pub type Comparer<V> = Arc<dyn Fn(&V, &V) -> Result<Ordering> + Send + Sync>;

/// Derives the group key of a value.
pub type GroupSelector<V, G> = Arc<dyn Fn(&V) -> Result<G> + Send + Sync>;

/// Maps a value into another value type.
pub type Transformer<V, U> = Arc<dyn Fn(&V) -> Result<U> + Send + Sync>;

/// Wraps an infallible predicate.
pub fn predicate<V, F>(f: F) -> Predicate<V>
where
    F: Fn(&V) -> bool + Send + Sync + 'static,
{
    Arc::new(move |v: &V| -> Result<bool> { Ok(f(v)) })
}

/// Wraps a fallible predicate.
pub fn try_predicate<V, F>(f: F) -> Predicate<V>
where
    F: Fn(&V) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps an infallible comparer.
pub fn comparer<V, F>(f: F) -> Comparer<V>
where
    F: Fn(&V, &V) -> Ordering + Send + Sync + 'static,
{
    Arc::new(move |a: &V, b: &V| -> Result<Ordering> { Ok(f(a, b)) })
}

/// Wraps a fallible comparer.
pub fn try_comparer<V, F>(f: F) -> Comparer<V>
where
    F: Fn(&V, &V) -> Result<Ordering> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps an infallible group selector.
pub fn group_selector<V, G, F>(f: F) -> GroupSelector<V, G>
where
    F: Fn(&V) -> G + Send + Sync + 'static,
{
    Arc::new(move |v: &V| -> Result<G> { Ok(f(v)) })
}

/// Wraps a fallible group selector.
pub fn try_group_selector<V, G, F>(f: F) -> GroupSelector<V, G>
where
    F: Fn(&V) -> Result<G> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps an infallible transform.
pub fn transformer<V, U, F>(f: F) -> Transformer<V, U>
where
    F: Fn(&V) -> U + Send + Sync + 'static,
{
    Arc::new(move |v: &V| -> Result<U> { Ok(f(v)) })
}

/// Wraps a fallible transform.
pub fn try_transformer<V, U, F>(f: F) -> Transformer<V, U>
where
    F: Fn(&V) -> Result<U> + Send + Sync + 'static,
{
    Arc::new(f)
}
