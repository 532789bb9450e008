//! Request deduplication.
//!
//! At most one network request per cache key is in flight; concurrent callers
//! share its outcome. Every issued request gets a generation and only the
//! newest generation for a key may write the entry, so an older response that
//! arrives late is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error};

use crate::api::ApiError;

use super::entry::CacheEntry;
use super::keys::{CacheKey, TagSet};
use super::lock::mutex_lock;
use super::store::{CacheStore, Generation};

const SOURCE: &str = "cache::dedup";
const METRIC_FETCH_TOTAL: &str = "vitrine_fetch_total";
const METRIC_FETCH_DEDUP_TOTAL: &str = "vitrine_fetch_dedup_total";

pub type FetchResult = Result<Value, ApiError>;

/// Issues one network request for a query. Called once per issued request.
pub type Loader = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, CacheEntry>>;

struct InFlight {
    generation: Generation,
    future: SharedFetch,
}

type InFlightMap = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// Writes the outcome of one request and releases its in-flight slot.
#[derive(Clone)]
struct Completion {
    store: Arc<CacheStore>,
    in_flight: InFlightMap,
    key: CacheKey,
    tags: TagSet,
    generation: Generation,
}

impl Completion {
    fn finish(&self, result: FetchResult) -> CacheEntry {
        let entry = self
            .store
            .resolve(&self.key, self.generation, &self.tags, &result);

        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "finish");
        if in_flight
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation)
        {
            in_flight.remove(&self.key);
        }
        entry
    }
}

pub struct Deduplicator {
    store: Arc<CacheStore>,
    in_flight: InFlightMap,
    next_generation: AtomicU64,
}

impl Deduplicator {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Join the request in flight for `key`, or issue a new one.
    pub async fn fetch(&self, key: &CacheKey, tags: &TagSet, loader: &Loader) -> CacheEntry {
        self.start(key, tags, loader, false).await
    }

    /// Issue a new request even when one is in flight. The earlier request
    /// still completes for its waiters but can no longer write the entry.
    pub async fn refetch(&self, key: &CacheKey, tags: &TagSet, loader: &Loader) -> CacheEntry {
        self.start(key, tags, loader, true).await
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.in_flight, SOURCE, "is_in_flight").contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        mutex_lock(&self.in_flight, SOURCE, "in_flight_count").len()
    }

    fn start(&self, key: &CacheKey, tags: &TagSet, loader: &Loader, force: bool) -> SharedFetch {
        // Held across spawn and insert so the completion cannot clear the
        // slot before it exists.
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "start");
        if !force && let Some(existing) = in_flight.get(key) {
            counter!(METRIC_FETCH_DEDUP_TOTAL).increment(1);
            debug!(cache_key = %key, generation = existing.generation, "Joined in-flight request");
            return existing.future.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.store.begin_fetch(key, generation);
        counter!(METRIC_FETCH_TOTAL).increment(1);
        debug!(cache_key = %key, generation, "Issued request");

        let completion = Completion {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            tags: tags.clone(),
            generation,
        };

        let request = loader();
        let task = {
            let completion = completion.clone();
            tokio::spawn(async move {
                let result = request.await;
                completion.finish(result)
            })
        };

        let future = async move {
            match task.await {
                Ok(entry) => entry,
                Err(err) => {
                    error!(cache_key = %completion.key, error = %err, "Request task failed");
                    completion.finish(Err(ApiError::network(err.to_string())))
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                future: future.clone(),
            },
        );
        future
    }
}
