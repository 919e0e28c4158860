//! Virtualize operator: an arbitrary index window over a sorted view.

use crate::operators::sort::{SortedChangeSet, SortedItems};
use crate::operators::window::Window;
use cachet_core::{ChangeSet, ChangeSetKind, Error, Result};
use core::hash::Hash;
use hashbrown::HashMap;

/// Requested window: `size` items starting at `start_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VirtualRequest {
    start_index: usize,
    size: usize,
}

impl VirtualRequest {
    /// Creates a window request. The size must be at least 1.
    pub fn new(start_index: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::argument("virtual window size must be at least 1"));
        }
        Ok(Self { start_index, size })
    }

    /// Returns the first requested index.
    #[inline]
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Returns the requested number of items.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for VirtualRequest {
    fn default() -> Self {
        Self {
            start_index: 0,
            size: 25,
        }
    }
}

/// The window actually delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VirtualResponse {
    start_index: usize,
    size: usize,
    total_size: usize,
}

impl VirtualResponse {
    /// Returns the requested first index.
    #[inline]
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Returns the number of items inside the window.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of items in the sorted view.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

/// Output of the virtualize operator.
#[derive(Clone, Debug)]
pub struct VirtualChangeSet<K, V> {
    changes: ChangeSet<K, V>,
    items: SortedItems<K, V>,
    response: VirtualResponse,
}

impl<K, V> VirtualChangeSet<K, V> {
    /// Returns the changes of the window, indexed within the window.
    #[inline]
    pub fn changes(&self) -> &ChangeSet<K, V> {
        &self.changes
    }

    /// Returns the items inside the window after the changes.
    #[inline]
    pub fn items(&self) -> &SortedItems<K, V> {
        &self.items
    }

    /// Returns the delivered window.
    #[inline]
    pub fn response(&self) -> VirtualResponse {
        self.response
    }

    /// Consumes the virtual change set, returning the changes.
    pub fn into_changes(self) -> ChangeSet<K, V> {
        self.changes
    }
}

/// Stateful index window over a sorted change stream.
pub struct Virtualize<K, V> {
    request: VirtualRequest,
    window: Window<K, V>,
}

impl<K, V> Virtualize<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a virtualize operator over the requested window.
    pub fn new(request: VirtualRequest) -> Self {
        Self {
            request,
            window: Window::new(),
        }
    }

    /// Returns the current request.
    #[inline]
    pub fn request(&self) -> VirtualRequest {
        self.request
    }

    /// Returns the items inside the window.
    pub fn items(&self) -> &[(K, V)] {
        self.window.items()
    }

    /// Processes one sorted change set.
    pub fn process(&mut self, sorted: &SortedChangeSet<K, V>) -> VirtualChangeSet<K, V> {
        let touched = self.window.ingest(sorted);
        let changes = self
            .window
            .diff(self.request.start_index, self.request.size, &touched, sorted.changes().kind());
        self.finish(changes)
    }

    /// Moves the window. The result is a full re-evaluation against the
    /// current order.
    pub fn set_request(&mut self, request: VirtualRequest) -> VirtualChangeSet<K, V> {
        self.request = request;
        let changes = self
            .window
            .diff(request.start_index, request.size, &HashMap::new(), ChangeSetKind::FullRefresh);
        self.finish(changes)
    }

    fn finish(&self, changes: ChangeSet<K, V>) -> VirtualChangeSet<K, V> {
        VirtualChangeSet {
            changes,
            items: self.window.snapshot(),
            response: VirtualResponse {
                start_index: self.request.start_index,
                size: self.window.len(),
                total_size: self.window.total(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::comparer;
    use crate::operators::sort::Sort;
    use cachet_core::{Change, ChangeReason};

    fn keys(window: &Virtualize<i32, i32>) -> Vec<i32> {
        window.items().iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn test_virtualize_window_and_scroll() {
        let mut sort = Sort::new(comparer(|a: &i32, b: &i32| a.cmp(b)));
        let initial = sort
            .process(&(0..10).map(|i| Change::add(i, i)).collect())
            .unwrap();

        let mut window = Virtualize::new(VirtualRequest::new(2, 4).unwrap());
        let out = window.process(&initial);
        assert_eq!(out.changes().adds(), 4);
        assert_eq!(keys(&window), vec![2, 3, 4, 5]);

        // Scrolling by one keeps three items and moves them up
        let out = window.set_request(VirtualRequest::new(3, 4).unwrap());
        let reasons: Vec<_> = out.changes().iter().map(|c| (c.reason(), *c.key())).collect();
        assert_eq!(reasons, vec![(ChangeReason::Remove, 2), (ChangeReason::Add, 6)]);
        assert_eq!(keys(&window), vec![3, 4, 5, 6]);
        assert_eq!(out.items().len(), 4);
        assert_eq!(out.response().total_size(), 10);
    }

    #[test]
    fn test_virtualize_move_inside_window() {
        let mut sort = Sort::new(comparer(|a: &i32, b: &i32| a.cmp(b)));
        let initial = sort
            .process(&(0..10).map(|i| Change::add(i, i * 10)).collect())
            .unwrap();
        let mut window = Virtualize::new(VirtualRequest::new(0, 5).unwrap());
        window.process(&initial);

        // Key 4 moves to the front of the window
        let sorted = sort.process(&vec![Change::update(4, -5, 40)].into_iter().collect()).unwrap();
        let out = window.process(&sorted);
        assert_eq!(out.changes().len(), 1);
        let moved = &out.changes().as_slice()[0];
        assert_eq!(moved.reason(), ChangeReason::Moved);
        assert_eq!((moved.previous_index(), moved.current_index()), (Some(4), Some(0)));
        assert_eq!(moved.previous(), Some(&40));
        assert_eq!(keys(&window), vec![4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_virtualize_start_beyond_end_is_empty() {
        let mut sort = Sort::new(comparer(|a: &i32, b: &i32| a.cmp(b)));
        let initial = sort.process(&(0..3).map(|i| Change::add(i, i)).collect()).unwrap();
        let mut window = Virtualize::new(VirtualRequest::new(10, 5).unwrap());

        let out = window.process(&initial);
        assert!(out.changes().is_empty());
        assert_eq!(out.response().size(), 0);
    }
}
