//! Cachet Core - Change model for the Cachet change-tracking cache.
//!
//! This crate provides the value types every other Cachet crate speaks:
//!
//! - `Change`: one keyed mutation (reason, key, current/previous value, indices)
//! - `ChangeSet`: an ordered batch of changes with per-reason counters
//! - `Error`: the error taxonomy shared by stores, edits and operators
//!
//! # Example
//!
//! ```rust
//! use cachet_core::{Change, ChangeReason, ChangeSet};
//!
//! let mut changes = ChangeSet::new();
//! changes.push(Change::add("alice", 30));
//! changes.push(Change::update("alice", 31, 30));
//!
//! assert_eq!(changes.adds(), 1);
//! assert_eq!(changes.updates(), 1);
//! assert_eq!(changes.as_slice()[1].reason(), ChangeReason::Update);
//! ```

mod change;
mod change_set;
mod error;

pub use change::{Change, ChangeReason};
pub use change_set::{ChangeSet, ChangeSetKind};
pub use error::{Error, Result};
