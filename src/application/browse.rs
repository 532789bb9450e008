//! Product listing session.
//!
//! Tracks what the listing currently shows: a committed search term wins over
//! a selected category, which wins over the plain paged listing. The session
//! keeps exactly one subscription, on the view being shown.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::api::Endpoint;
use crate::cache::lock::mutex_lock;
use crate::cache::{CacheEntry, Subscription};

use super::catalog::Catalog;
use super::pagination::{Pagination, PaginationState};
use super::search::{SearchCommit, SearchSink};

const SOURCE: &str = "application::browse";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Search(String),
    Category(String),
    Page { offset: u32, limit: u32 },
}

impl View {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::Search(text) => Endpoint::Search { text: text.clone() },
            Self::Category(category_id) => Endpoint::ProductsByCategory {
                category_id: category_id.clone(),
            },
            Self::Page { offset, limit } => Endpoint::Products {
                offset: *offset,
                limit: *limit,
            },
        }
    }
}

struct BrowseState {
    pagination: Pagination,
    category: Option<String>,
    term: Option<String>,
    shown: Option<Subscription>,
}

impl BrowseState {
    fn view(&self) -> View {
        if let Some(term) = &self.term {
            View::Search(term.clone())
        } else if let Some(category) = &self.category {
            View::Category(category.clone())
        } else {
            View::Page {
                offset: self.pagination.offset(),
                limit: self.pagination.limit(),
            }
        }
    }

    /// Feed the shown entry's latest payload to the pager, so a background
    /// refetch of the visible page moves `has_more` as well.
    fn sync_shown_result(&mut self) {
        let Some(entry) = self.shown.as_ref().map(Subscription::current) else {
            return;
        };
        if entry.is_success() && entry.key == self.view().endpoint().key() {
            self.pagination.record_result(entry.item_count().unwrap_or(0));
        }
    }

    fn filters_changed(&mut self) {
        let active = self.category.is_some() || self.term.is_some();
        self.pagination.filter_changed(active);
    }
}

pub struct BrowseSession {
    catalog: Arc<Catalog>,
    state: Mutex<BrowseState>,
}

impl BrowseSession {
    pub fn new(catalog: Arc<Catalog>, page_size: NonZeroU32) -> Self {
        Self {
            catalog,
            state: Mutex::new(BrowseState {
                pagination: Pagination::new(page_size),
                category: None,
                term: None,
                shown: None,
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn current_view(&self) -> View {
        mutex_lock(&self.state, SOURCE, "current_view").view()
    }

    pub fn pagination(&self) -> PaginationState {
        let mut state = mutex_lock(&self.state, SOURCE, "pagination");
        state.sync_shown_result();
        state.pagination.state()
    }

    pub fn page_window(&self) -> Vec<u32> {
        mutex_lock(&self.state, SOURCE, "page_window")
            .pagination
            .page_window()
    }

    /// Filter by category, or show everything with `None`. Clears the search
    /// and restarts at page 1.
    pub fn select_category(&self, category_id: Option<String>) {
        let mut state = mutex_lock(&self.state, SOURCE, "select_category");
        state.category = category_id.filter(|id| !id.is_empty());
        state.term = None;
        state.filters_changed();
    }

    /// Apply a settled search input.
    pub fn apply_search(&self, commit: SearchCommit) {
        let mut state = mutex_lock(&self.state, SOURCE, "apply_search");
        let term = match commit {
            SearchCommit::Term(term) => Some(term),
            SearchCommit::Cleared => None,
        };
        if state.term != term {
            state.term = term;
            state.filters_changed();
        }
    }

    pub fn next_page(&self) -> Option<u32> {
        let mut state = mutex_lock(&self.state, SOURCE, "next_page");
        state.sync_shown_result();
        state.pagination.next_page()
    }

    pub fn prev_page(&self) -> u32 {
        mutex_lock(&self.state, SOURCE, "prev_page").pagination.prev_page()
    }

    pub fn set_page(&self, page: u32) -> u32 {
        mutex_lock(&self.state, SOURCE, "set_page").pagination.set_page(page)
    }

    /// Fetch the current view, moving the session's subscription onto it.
    pub async fn show(&self) -> CacheEntry {
        let view = self.current_view();
        let query = self.catalog.query(view.endpoint());
        let client = self.catalog.client();

        let previous = {
            let mut state = mutex_lock(&self.state, SOURCE, "show");
            let already_shown = state
                .shown
                .as_ref()
                .is_some_and(|shown| shown.key() == query.key());
            if already_shown {
                None
            } else {
                state.shown.replace(client.subscribe(&query))
            }
        };
        if let Some(previous) = previous {
            client.unsubscribe(previous.key());
        }

        let entry = client.fetch(&query).await;

        mutex_lock(&self.state, SOURCE, "record_result").sync_shown_result();
        debug!(cache_key = %query.key(), ?view, status = ?entry.status, "Showing view");
        entry
    }

    /// Latest entry of the view being shown.
    pub fn current_entry(&self) -> Option<CacheEntry> {
        mutex_lock(&self.state, SOURCE, "current_entry")
            .shown
            .as_ref()
            .map(Subscription::current)
    }

    /// Live updates of the view being shown.
    pub fn updates(&self) -> Option<Subscription> {
        mutex_lock(&self.state, SOURCE, "updates").shown.clone()
    }

    /// Release the session's subscription.
    pub fn close(&self) {
        let shown = mutex_lock(&self.state, SOURCE, "close").shown.take();
        if let Some(shown) = shown {
            self.catalog.client().unsubscribe(shown.key());
        }
    }
}

#[async_trait]
impl SearchSink for BrowseSession {
    async fn commit(&self, commit: SearchCommit) {
        self.apply_search(commit);
        self.show().await;
    }
}
