//! Derived-view operators.
//!
//! This module provides the stateful incremental transforms:
//! - Filter: matched-set diffing against a predicate
//! - Sort: ordered view with indexed changes
//! - GroupBy: partitions members into groups
//! - Page / Virtualize: windows over a sorted view
//! - Transform: maps values into another type

mod filter;
mod group;
mod page;
mod sort;
mod transform;
mod virtualize;
mod window;

pub use filter::Filter;
pub use group::{GroupBy, GroupChange, GroupReason, GroupedChangeSet};
pub use page::{Page, PageRequest, PageResponse, PagedChangeSet};
pub use sort::{Sort, SortReason, SortedChangeSet, SortedItems};
pub use transform::Transform;
pub use virtualize::{VirtualChangeSet, VirtualRequest, VirtualResponse, Virtualize};
