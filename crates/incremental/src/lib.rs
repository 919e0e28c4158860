//! Cachet Incremental - Derived-view operators for Cachet.
//!
//! Every operator is a stateful incremental transform: it consumes one
//! `ChangeSet` at a time, updates its own auxiliary structure and returns
//! the downstream `ChangeSet`. Nothing is recomputed from scratch unless the
//! operator's defining parameter (predicate, comparer, selector, window)
//! is replaced, in which case the output is tagged `ChangeSetKind::FullRefresh`.
//!
//! # Operators
//!
//! - `Filter`: matched-set diffing against a static or replaceable predicate
//! - `Sort`: stable ordered view emitting indexed changes and single moves
//! - `GroupBy`: per-group change sets plus group add/remove events
//! - `Page` / `Virtualize`: windows over a sorted view
//! - `Transform`: value mapping that keeps reasons and indices
//! - `Diagnostics`: running counters over a change-set stream
//!
//! # Example
//!
//! ```rust
//! use cachet_core::{Change, ChangeReason, ChangeSet};
//! use cachet_incremental::{comparer, Sort};
//!
//! let mut sort = Sort::new(comparer(|a: &i32, b: &i32| a.cmp(b)));
//! let initial: ChangeSet<&str, i32> =
//!     vec![Change::add("a", 3), Change::add("b", 1), Change::add("c", 2)].into_iter().collect();
//! sort.process(&initial).unwrap();
//!
//! let out = sort.process(&vec![Change::update("c", 0, 2)].into_iter().collect()).unwrap();
//! let moved = &out.changes().as_slice()[0];
//! assert_eq!(moved.reason(), ChangeReason::Moved);
//! assert_eq!((moved.previous_index(), moved.current_index()), (Some(1), Some(0)));
//! ```

pub mod diagnostics;
pub mod func;
pub mod operators;

pub use diagnostics::{ChangeStatistics, ChangeSummary, Diagnostics};
pub use func::{
    comparer, group_selector, predicate, transformer, try_comparer, try_group_selector, try_predicate,
    try_transformer, Comparer, GroupSelector, Predicate, Transformer,
};
pub use operators::{
    Filter, GroupBy, GroupChange, GroupReason, GroupedChangeSet, Page, PageRequest, PageResponse, PagedChangeSet,
    Sort, SortReason, SortedChangeSet, SortedItems, Transform, VirtualChangeSet, VirtualRequest, VirtualResponse,
    Virtualize,
};
