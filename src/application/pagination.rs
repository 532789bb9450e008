//! Offset pagination for the product listing.
//!
//! The API exposes no total count, so whether another page exists is guessed
//! from the last page: a full page suggests more. When the final page is
//! exactly `limit` long this allows one extra, empty page request.

use std::num::NonZeroU32;

use serde::Serialize;

/// Number of page buttons shown around the current page.
pub const PAGE_WINDOW: u32 = 5;

/// Snapshot of the pagination state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub page: u32,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    page: u32,
    limit: NonZeroU32,
    /// Length of the most recent result for the current page.
    last_len: Option<usize>,
    /// Category or search results are not paged.
    suspended: bool,
}

impl Pagination {
    pub fn new(limit: NonZeroU32) -> Self {
        Self {
            page: 1,
            limit,
            last_len: None,
            suspended: false,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit.get())
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// True iff the last page came back full and pagination is active.
    pub fn has_more(&self) -> bool {
        !self.suspended
            && self
                .last_len
                .is_some_and(|len| u32::try_from(len).is_ok_and(|len| len == self.limit.get()))
    }

    /// Advance one page if another page is plausible; returns the new page.
    pub fn next_page(&mut self) -> Option<u32> {
        if !self.has_more() {
            return None;
        }
        Some(self.move_to(self.page.saturating_add(1)))
    }

    pub fn prev_page(&mut self) -> u32 {
        self.move_to(self.page.saturating_sub(1))
    }

    /// Jump to page `n`, clamped to at least 1.
    pub fn set_page(&mut self, n: u32) -> u32 {
        self.move_to(n)
    }

    pub fn record_result(&mut self, len: usize) {
        self.last_len = Some(len);
    }

    /// A category filter or search term was set or cleared. Pagination is
    /// suspended while one is active and always restarts at page 1.
    pub fn filter_changed(&mut self, active: bool) {
        self.suspended = active;
        self.page = 1;
        self.last_len = None;
    }

    /// Page numbers of the pager buttons, starting two pages before the
    /// current one once past page 3 and staying five wide at the top of the
    /// `u32` range.
    pub fn page_window(&self) -> Vec<u32> {
        let start = self
            .page
            .saturating_sub(2)
            .clamp(1, u32::MAX - (PAGE_WINDOW - 1));
        (start..=start + (PAGE_WINDOW - 1)).collect()
    }

    pub fn state(&self) -> PaginationState {
        PaginationState {
            page: self.page,
            limit: self.limit(),
            offset: self.offset(),
            has_more: self.has_more(),
        }
    }

    fn move_to(&mut self, page: u32) -> u32 {
        let page = page.max(1);
        if page != self.page {
            self.page = page;
            self.last_len = None;
        }
        self.page
    }
}
