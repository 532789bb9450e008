//! Query client.
//!
//! Entry point for reads: owns the store and the deduplicator, and remembers
//! the loader of every subscribed key so invalidation can refetch it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, info};

use super::config::CacheConfig;
use super::dedup::{Deduplicator, FetchResult, Loader};
use super::entry::CacheEntry;
use super::keys::{CacheKey, Tag, TagSet};
use super::lock::mutex_lock;
use super::store::{CacheStore, Subscription};

const SOURCE: &str = "cache::client";
const METRIC_CACHE_HIT_TOTAL: &str = "vitrine_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "vitrine_cache_miss_total";
const METRIC_INVALIDATE_TOTAL: &str = "vitrine_invalidate_total";

/// A cacheable read: where its result lives, which tags it declares and how
/// to load it.
#[derive(Clone)]
pub struct Query {
    key: CacheKey,
    tags: TagSet,
    loader: Loader,
}

impl Query {
    pub fn new(key: CacheKey, tags: TagSet, loader: Loader) -> Self {
        Self { key, tags, loader }
    }

    pub fn from_fn<F, Fut>(key: CacheKey, tags: TagSet, load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        Self::new(key, tags, Arc::new(move || load().boxed()))
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Outcome of invalidating a set of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Every key found under the tags.
    pub matched: Vec<CacheKey>,
    /// Keys flipped from fresh to stale.
    pub marked_stale: Vec<CacheKey>,
    /// Keys with live subscribers that were refetched.
    pub refetched: Vec<CacheKey>,
}

pub struct QueryClient {
    dedup: Deduplicator,
    queries: Mutex<HashMap<CacheKey, Query>>,
}

impl QueryClient {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_store(Arc::new(CacheStore::new(config)))
    }

    pub fn with_store(store: Arc<CacheStore>) -> Self {
        Self {
            dedup: Deduplicator::new(store),
            queries: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        self.dedup.store()
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Start observing a query. The caller drives loading with [`Self::fetch`].
    pub fn subscribe(&self, query: &Query) -> Subscription {
        let subscription = self.store().subscribe(query.key());
        mutex_lock(&self.queries, SOURCE, "subscribe").insert(query.key().clone(), query.clone());
        subscription
    }

    /// Release one subscription; the last one hands the entry to the
    /// keep-alive policy. Requests in flight keep running.
    pub fn unsubscribe(&self, key: &CacheKey) -> usize {
        let remaining = self.store().unsubscribe(key);
        if remaining == 0 {
            mutex_lock(&self.queries, SOURCE, "unsubscribe").remove(key);
        }
        remaining
    }

    /// Serve a fresh cached entry, or load through the deduplicator.
    pub async fn fetch(&self, query: &Query) -> CacheEntry {
        if let Some(entry) = self.store().get(query.key())
            && entry.is_fresh()
        {
            counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
            return entry;
        }
        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        self.dedup.fetch(query.key(), query.tags(), &query.loader).await
    }

    /// Like [`Self::fetch`], but stop waiting once `cancel` resolves.
    ///
    /// Cancelling only abandons the wait: the request still completes and
    /// populates the cache for everyone else.
    pub async fn fetch_until<C>(&self, query: &Query, cancel: C) -> Option<CacheEntry>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            entry = self.fetch(query) => Some(entry),
            () = cancel => {
                debug!(cache_key = %query.key(), "Stopped waiting for query");
                None
            }
        }
    }

    /// Load again even if a request is in flight; the newest request wins.
    pub async fn refetch(&self, query: &Query) -> CacheEntry {
        self.dedup.refetch(query.key(), query.tags(), &query.loader).await
    }

    /// Mark every entry under `tags` stale and refetch the ones with
    /// subscribers. Unsubscribed entries reload on their next fetch.
    pub async fn invalidate(&self, tags: &[Tag]) -> Invalidation {
        if tags.is_empty() {
            return Invalidation::default();
        }
        counter!(METRIC_INVALIDATE_TOTAL).increment(1);

        let matched = self.store().keys_for_tags(tags);
        let marked_stale = self.store().mark_stale(&matched);
        let refetched = self.refresh_keys(&matched).await;

        info!(
            tags = %format_tags(tags),
            matched = matched.len(),
            stale = marked_stale.len(),
            refetched = refetched.len(),
            "Invalidated cache tags"
        );
        Invalidation {
            matched: matched.into_iter().collect(),
            marked_stale,
            refetched,
        }
    }

    /// Refetch every key in `keys` that has subscribers and a known query.
    pub async fn refresh_keys<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) -> Vec<CacheKey> {
        let store = self.store();
        let candidates: BTreeSet<&CacheKey> = keys.into_iter().collect();
        let due: Vec<Query> = {
            let queries = mutex_lock(&self.queries, SOURCE, "refresh_keys");
            candidates
                .into_iter()
                .filter(|key| store.subscribers(key) > 0)
                .filter_map(|key| queries.get(key).cloned())
                .collect()
        };

        join_all(due.iter().map(|query| self.refetch(query))).await;
        due.into_iter().map(|query| query.key).collect()
    }
}

fn format_tags(tags: &[Tag]) -> String {
    tags.iter().map(Tag::as_str).collect::<Vec<_>>().join(",")
}
