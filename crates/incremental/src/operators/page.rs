//! Page operator: a fixed-size page window over a sorted view.

use crate::operators::sort::{SortedChangeSet, SortedItems};
use crate::operators::window::Window;
use cachet_core::{ChangeReason, ChangeSet, ChangeSetKind, Error, Result};
use core::hash::Hash;
use hashbrown::HashMap;

/// Requested page, 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageRequest {
    page: usize,
    size: usize,
}

impl PageRequest {
    /// Creates a page request. Both page and size must be at least 1.
    pub fn new(page: usize, size: usize) -> Result<Self> {
        if page == 0 {
            return Err(Error::argument("page numbers start at 1"));
        }
        if size == 0 {
            return Err(Error::argument("page size must be at least 1"));
        }
        Ok(Self { page, size })
    }

    /// Returns the requested page number.
    #[inline]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Returns the page size.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 25 }
    }
}

/// The page actually delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageResponse {
    page: usize,
    page_size: usize,
    total_size: usize,
    pages: usize,
}

impl PageResponse {
    /// Returns the delivered page number, after clamping to the last page.
    #[inline]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Returns the page size.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of items in the sorted view.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Returns the number of pages; an empty view has one empty page.
    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }
}

/// Output of the page operator.
#[derive(Clone, Debug)]
pub struct PagedChangeSet<K, V> {
    changes: ChangeSet<K, V>,
    items: SortedItems<K, V>,
    response: PageResponse,
}

impl<K, V> PagedChangeSet<K, V> {
    /// Returns the changes of the page, indexed within the page.
    #[inline]
    pub fn changes(&self) -> &ChangeSet<K, V> {
        &self.changes
    }

    /// Returns the items on the page after the changes, in order.
    #[inline]
    pub fn items(&self) -> &SortedItems<K, V> {
        &self.items
    }

    /// Returns the delivered page.
    #[inline]
    pub fn response(&self) -> PageResponse {
        self.response
    }

    /// Consumes the paged change set, returning the changes.
    pub fn into_changes(self) -> ChangeSet<K, V> {
        self.changes
    }
}

/// Stateful page window over a sorted change stream.
pub struct Page<K, V> {
    request: PageRequest,
    window: Window<K, V>,
}

impl<K, V> Page<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a page operator showing the requested page.
    pub fn new(request: PageRequest) -> Self {
        Self {
            request,
            window: Window::new(),
        }
    }

    /// Returns the current request.
    #[inline]
    pub fn request(&self) -> PageRequest {
        self.request
    }

    /// Returns the items on the current page.
    pub fn items(&self) -> &[(K, V)] {
        self.window.items()
    }

    /// Returns the page currently delivered.
    pub fn response(&self) -> PageResponse {
        let total = self.window.total();
        let size = self.request.size;
        let pages = total.div_ceil(size).max(1);
        PageResponse {
            page: self.request.page.min(pages),
            page_size: size,
            total_size: total,
            pages,
        }
    }

    /// Processes one sorted change set.
    pub fn process(&mut self, sorted: &SortedChangeSet<K, V>) -> PagedChangeSet<K, V> {
        let touched = self.window.ingest(sorted);
        self.refresh(&touched, sorted.changes().kind())
    }

    /// Moves to another page. The result is a full re-evaluation of the
    /// window against the current order.
    pub fn set_request(&mut self, request: PageRequest) -> PagedChangeSet<K, V> {
        self.request = request;
        self.refresh(&HashMap::new(), ChangeSetKind::FullRefresh)
    }

    fn refresh(&mut self, touched: &HashMap<K, ChangeReason>, kind: ChangeSetKind) -> PagedChangeSet<K, V> {
        let response = self.response();
        let start = (response.page - 1) * response.page_size;
        let changes = self.window.diff(start, response.page_size, touched, kind);
        tracing::trace!(
            page = response.page,
            pages = response.pages,
            changes = changes.len(),
            "page window updated"
        );
        PagedChangeSet {
            changes,
            items: self.window.snapshot(),
            response,
        }
    }
}
