//! Page normalization for list queries.
//!
//! Pages are 1-based. A zero page becomes page 1 and a zero size becomes the
//! configured default, so `(0, 0)` and `(1, default)` name the same page.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Default number of products per page.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// A normalized page request. Both fields are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    page: u64,
    size: u64,
}

impl PageRequest {
    /// Normalize a raw request using [`DEFAULT_PAGE_SIZE`].
    pub fn new(page: u64, size: u64) -> Self {
        Self::with_default_size(page, size, DEFAULT_PAGE_SIZE)
    }

    /// Normalize a raw request with an explicit default size.
    pub fn with_default_size(page: u64, size: u64, default_size: u64) -> Self {
        Self {
            page: page.max(1),
            size: if size == 0 { default_size.max(1) } else { size },
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of items before the first item of this page.
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.size)
    }

    /// Slice bounds of this page within a collection of `len` items.
    ///
    /// Both ends are clamped to `len`, so a page past the end yields an
    /// empty range instead of an out-of-range slice.
    pub fn bounds(&self, len: usize) -> Range<usize> {
        let len_u64 = len as u64;
        let start = self.offset().min(len_u64);
        let end = self.offset().saturating_add(self.size).min(len_u64);
        start as usize..end as usize
    }

    /// Take this page out of an already-sorted slice.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.bounds(items.len())]
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}
