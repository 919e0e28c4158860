//! Cachet Storage - Change-aware keyed store for Cachet.
//!
//! This crate provides the authoritative keyed storage and the only way to
//! mutate it:
//!
//! - `ChangeAwareStore`: key -> value map plus a buffer of net pending changes
//! - `Updater`: batch-oriented edit interface (keyed or key-selector mode)
//! - `Intent`: a single high level edit, for ordered edit sequences
//!
//! # Example
//!
//! ```rust
//! use cachet_storage::{ChangeAwareStore, Updater};
//!
//! let mut store = ChangeAwareStore::new();
//! {
//!     let mut updater = Updater::new(&mut store);
//!     updater.add_or_update_keyed("A", 1);
//!     updater.add_or_update_keyed("B", 2);
//!     updater.remove_key(&"A");
//! }
//!
//! // "A" was added and removed in the same batch: it nets to nothing
//! let changes = store.capture_changes();
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes.adds(), 1);
//! ```

pub mod store;
pub mod updater;

pub use store::{default_equality, ChangeAwareStore, Equality};
pub use updater::{Intent, KeySelector, Updater};
