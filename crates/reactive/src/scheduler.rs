//! Delivery schedulers.
//!
//! A scheduler runs a callback, possibly later or on another worker. The
//! cache itself never spawns threads; schedulers only decide where
//! notifications are delivered (see `ObservableExt::observe_on`).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs callbacks.
pub trait Scheduler: Send + Sync {
    /// Runs `task` now or later.
    fn schedule(&self, task: Task);
}

/// Runs every task synchronously on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    #[inline]
    fn schedule(&self, task: Task) {
        task();
    }
}

/// Queues tasks until the owner drains them with `run_pending`.
///
/// Useful for single-threaded event loops and deterministic tests.
#[derive(Clone, Default)]
pub struct QueueScheduler {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl QueueScheduler {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true if no task is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Runs queued tasks, including tasks they schedule, until the queue is
    /// empty. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop in its own statement so the guard drops before the task runs
            let Some(task) = self.tasks.lock().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

impl core::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueScheduler").field("pending", &self.len()).finish()
    }
}

/// Spawns each task onto a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioScheduler {
    /// Creates a scheduler spawning onto `handle`.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a scheduler for the runtime of the calling context.
    pub fn current() -> cachet_core::Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| cachet_core::Error::invalid_operation(format!("no tokio runtime: {e}")))
    }
}

#[cfg(feature = "tokio")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}
