//! Cachet Reactive - Observable change-tracking cache for Cachet.
//!
//! This crate puts the keyed store of `cachet-storage` behind a thread-safe
//! handle that publishes every batch of edits as one minimal `ChangeSet`,
//! and wires the incremental operators of `cachet-incremental` into streams.
//!
//! # Core Concepts
//!
//! - `ObservableCache`: the authoritative keyed collection. `edit` applies a
//!   batch, `connect` replays the current content then streams changes,
//!   `preview` sees a batch before it is applied, `watch` follows one key
//! - `Observable` / `Stream`: cold push sources with RAII `Subscription`s
//! - `Subject`: hot multicast source for parameters that change over time
//! - `ChangeStreamExt` / `SortedStreamExt`: filter, sort, group, transform,
//!   page and virtualize a change stream
//! - `Scheduler`: where a subscriber's notifications are delivered
//!
//! # Example
//!
//! ```rust
//! use cachet_reactive::{ChangeSet, ChangeStreamExt, ObservableCache, ObservableExt};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! let people = ObservableCache::<&str, u32>::new();
//! let adults = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&adults);
//! let _subscription = people
//!     .connect()
//!     .filter(|age: &u32| *age >= 18)
//!     .subscribe_next(move |changes: &ChangeSet<&str, u32>| {
//!         sink.lock().extend(changes.iter().map(|c| (c.reason(), *c.key())));
//!     });
//!
//! people
//!     .edit(|updater| {
//!         updater.add_or_update_keyed("ann", 31);
//!         updater.add_or_update_keyed("bob", 12);
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! assert_eq!(adults.lock().len(), 1);
//! ```

pub mod cache;
pub mod config;
mod emitter;
pub mod group;
pub mod observable;
pub mod operators;
pub mod scheduler;
pub mod subject;
pub mod subscription;
mod watch;

pub use cache::{CacheKey, CacheValue, ObservableCache, WeakObservableCache};
pub use config::{CacheBuilder, CacheConfig, ConnectOptions};
pub use group::Group;
pub use observable::{listener, Listener, Notification, Observable, ObservableExt, Stream};
pub use operators::{ChangeStreamExt, SortedStreamExt};
pub use scheduler::{ImmediateScheduler, QueueScheduler, Scheduler, Task};
#[cfg(feature = "tokio")]
pub use scheduler::TokioScheduler;
pub use subject::Subject;
pub use subscription::{SubscriberSet, Subscription, SubscriptionId};

pub use cachet_core::{Change, ChangeReason, ChangeSet, ChangeSetKind, Error, Result};
pub use cachet_incremental::{
    comparer, group_selector, predicate, transformer, try_comparer, try_group_selector, try_predicate,
    try_transformer, ChangeStatistics, ChangeSummary, Comparer, GroupSelector, PageRequest, PageResponse,
    PagedChangeSet, Predicate, SortReason, SortedChangeSet, SortedItems, Transformer, VirtualChangeSet,
    VirtualRequest, VirtualResponse,
};
pub use cachet_storage::{Intent, Updater};
