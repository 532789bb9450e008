//! Debounced search input.
//!
//! Rapid keystrokes collapse into a single downstream search once the input
//! has been quiet for the configured period. Only one timer is pending at a
//! time; every input replaces it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "application::search";

/// Default quiet period before a search is committed.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(300);

/// What the controller decided once input went quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCommit {
    /// Search for this trimmed, non-empty term.
    Term(String),
    /// The term is empty; show the regular listing instead.
    Cleared,
}

/// Receives committed search terms.
#[async_trait]
pub trait SearchSink: Send + Sync {
    async fn commit(&self, commit: SearchCommit);
}

#[derive(Default)]
struct SearchState {
    raw: String,
    active: Option<String>,
    pending: Option<JoinHandle<()>>,
    /// Bumped on every input so an expired timer can tell it was replaced.
    sequence: u64,
}

impl SearchState {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

pub struct DebouncedSearch {
    sink: Arc<dyn SearchSink>,
    quiet_period: Duration,
    state: Arc<Mutex<SearchState>>,
}

impl DebouncedSearch {
    pub fn new(sink: Arc<dyn SearchSink>, quiet_period: Duration) -> Self {
        Self {
            sink,
            quiet_period,
            state: Arc::new(Mutex::new(SearchState::default())),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Record raw input and restart the quiet-period timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_input(&self, raw: impl Into<String>) {
        let deadline = Instant::now() + self.quiet_period;
        let mut state = mutex_lock(&self.state, SOURCE, "on_input");
        state.cancel_pending();
        state.raw = raw.into();
        state.sequence += 1;

        let sequence = state.sequence;
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        state.pending = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            let commit = {
                let mut state = mutex_lock(&shared, SOURCE, "expire");
                if state.sequence != sequence {
                    return;
                }
                state.pending = None;
                let term = state.raw.trim().to_string();
                if term.is_empty() {
                    state.active = None;
                    SearchCommit::Cleared
                } else {
                    state.active = Some(term.clone());
                    SearchCommit::Term(term)
                }
            };
            debug!(?commit, "Search input settled");
            sink.commit(commit).await;
        }));
    }

    /// Drop pending input and the active term without committing anything.
    pub fn clear(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        state.cancel_pending();
        state.sequence += 1;
        state.raw.clear();
        state.active = None;
    }

    /// Last committed, trimmed search term.
    pub fn active_term(&self) -> Option<String> {
        mutex_lock(&self.state, SOURCE, "active_term").active.clone()
    }

    pub fn raw_input(&self) -> String {
        mutex_lock(&self.state, SOURCE, "raw_input").raw.clone()
    }

    pub fn is_pending(&self) -> bool {
        mutex_lock(&self.state, SOURCE, "is_pending").pending.is_some()
    }
}

impl Drop for DebouncedSearch {
    fn drop(&mut self) {
        mutex_lock(&self.state, SOURCE, "drop").cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        commits: Mutex<Vec<SearchCommit>>,
    }

    impl RecordingSink {
        fn commits(&self) -> Vec<SearchCommit> {
            self.commits.lock().expect("commits").clone()
        }
    }

    #[async_trait]
    impl SearchSink for RecordingSink {
        async fn commit(&self, commit: SearchCommit) {
            self.commits.lock().expect("commits").push(commit);
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn controller() -> (DebouncedSearch, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let search = DebouncedSearch::new(sink.clone(), DEFAULT_QUIET_PERIOD);
        (search, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_input_commits_once_with_last_value() {
        let (search, sink) = controller();

        for (index, text) in ["a", "ap", "app"].into_iter().enumerate() {
            if index > 0 {
                advance(Duration::from_millis(50)).await;
            }
            search.on_input(text);
            settle().await;
        }

        advance(Duration::from_millis(299)).await;
        settle().await;
        assert!(sink.commits().is_empty());
        assert!(search.is_pending());

        advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(sink.commits(), vec![SearchCommit::Term("app".into())]);
        assert_eq!(search.active_term().as_deref(), Some("app"));
        assert!(!search.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_only_input_clears_search() {
        let (search, sink) = controller();
        search.on_input("   ");
        settle().await;

        advance(DEFAULT_QUIET_PERIOD).await;
        settle().await;

        assert_eq!(sink.commits(), vec![SearchCommit::Cleared]);
        assert!(search.active_term().is_none());
        assert_eq!(search.raw_input(), "   ");
    }

    #[tokio::test(start_paused = true)]
    async fn committed_term_is_trimmed() {
        let (search, sink) = controller();
        search.on_input("  desk lamp ");
        settle().await;

        advance(DEFAULT_QUIET_PERIOD).await;
        settle().await;

        assert_eq!(sink.commits(), vec![SearchCommit::Term("desk lamp".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_pending_timer() {
        let (search, sink) = controller();
        search.on_input("lamp");
        settle().await;
        search.clear();

        advance(Duration::from_secs(1)).await;
        settle().await;

        assert!(sink.commits().is_empty());
        assert!(search.raw_input().is_empty());
        assert!(!search.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_commit_separately() {
        let (search, sink) = controller();
        search.on_input("lamp");
        settle().await;
        advance(DEFAULT_QUIET_PERIOD).await;
        settle().await;

        search.on_input("chair");
        settle().await;
        advance(DEFAULT_QUIET_PERIOD).await;
        settle().await;

        assert_eq!(
            sink.commits(),
            vec![
                SearchCommit::Term("lamp".into()),
                SearchCommit::Term("chair".into())
            ]
        );
    }
}
