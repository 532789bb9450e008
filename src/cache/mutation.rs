//! Mutation executor.
//!
//! Runs a write against the API with an optional optimistic patch: the patch
//! is published before the request resolves, committed on success and rolled
//! back from its snapshots on failure. Declared tags are invalidated only
//! after the request succeeds.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::api::ApiError;

use super::client::QueryClient;
use super::keys::{CacheKey, Tag};
use super::store::{CacheStore, PatchFn, PatchReceipt, RollbackError};

const METRIC_MUTATION_ROLLBACK_TOTAL: &str = "vitrine_mutation_rollback_total";

/// Expected effect of a mutation on a set of cached entries.
#[derive(Clone)]
pub struct OptimisticPatch {
    keys: Vec<CacheKey>,
    apply: PatchFn,
}

impl OptimisticPatch {
    pub fn new<F>(keys: Vec<CacheKey>, apply: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            keys,
            apply: Arc::new(apply),
        }
    }

    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }
}

#[derive(Clone, Default)]
pub struct MutateOptions {
    pub optimistic: Option<OptimisticPatch>,
}

impl MutateOptions {
    pub fn optimistic(patch: OptimisticPatch) -> Self {
        Self {
            optimistic: Some(patch),
        }
    }
}

/// A write request and the tags it makes inconsistent.
pub struct Mutation<T> {
    name: &'static str,
    invalidates: Vec<Tag>,
    request: BoxFuture<'static, Result<T, ApiError>>,
}

impl<T> Mutation<T> {
    pub fn new<Fut>(name: &'static str, invalidates: Vec<Tag>, request: Fut) -> Self
    where
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Self {
            name,
            invalidates,
            request: request.boxed(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn invalidates(&self) -> &[Tag] {
        &self.invalidates
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    /// The request failed; any optimistic patch has been rolled back.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The request failed and its patch could not be fully restored. The
    /// affected keys were marked stale and refetched.
    #[error("mutation {mutation_id} failed and could not be rolled back: {cause}")]
    Rollback {
        mutation_id: Uuid,
        cause: ApiError,
        #[source]
        source: RollbackError,
    },
}

impl MutationError {
    /// The API failure behind this error.
    pub fn api_error(&self) -> &ApiError {
        match self {
            Self::Api(err) | Self::Rollback { cause: err, .. } => err,
        }
    }
}

/// Applied optimistic patch that rolls itself back unless settled.
///
/// Dropping an unsettled guard (the mutation future was abandoned) restores
/// the snapshots, so the cache never keeps an unconfirmed patch.
struct PatchGuard {
    store: Arc<CacheStore>,
    receipt: Option<PatchReceipt>,
}

impl PatchGuard {
    fn apply(store: Arc<CacheStore>, mutation_id: Uuid, patch: &OptimisticPatch) -> Self {
        let receipt = store.apply_patch(mutation_id, &patch.keys, &patch.apply);
        debug!(
            mutation_id = %mutation_id,
            patched = receipt.keys.len(),
            "Applied optimistic patch"
        );
        Self {
            store,
            receipt: Some(receipt),
        }
    }

    fn keys(&self) -> &[CacheKey] {
        self.receipt
            .as_ref()
            .map(|receipt| receipt.keys.as_slice())
            .unwrap_or_default()
    }

    fn commit(mut self) {
        if let Some(receipt) = self.receipt.take() {
            self.store.commit_patch(&receipt);
        }
    }

    fn rollback(mut self) -> Result<(), RollbackError> {
        match self.receipt.take() {
            Some(receipt) => {
                counter!(METRIC_MUTATION_ROLLBACK_TOTAL).increment(1);
                self.store.rollback_patch(&receipt)
            }
            None => Ok(()),
        }
    }
}

impl Drop for PatchGuard {
    fn drop(&mut self) {
        if let Some(receipt) = self.receipt.take() {
            warn!(
                mutation_id = %receipt.mutation_id,
                "Mutation abandoned before completion; rolling back optimistic patch"
            );
            counter!(METRIC_MUTATION_ROLLBACK_TOTAL).increment(1);
            if let Err(err) = self.store.rollback_patch(&receipt) {
                error!(mutation_id = %receipt.mutation_id, error = %err, "Rollback of abandoned mutation failed");
                self.store.mark_stale(&receipt.keys);
            }
        }
    }
}

pub struct MutationExecutor {
    client: Arc<QueryClient>,
}

impl MutationExecutor {
    pub fn new(client: Arc<QueryClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<QueryClient> {
        &self.client
    }

    pub async fn mutate<T>(&self, mutation: Mutation<T>, options: MutateOptions) -> Result<T, MutationError> {
        let mutation_id = Uuid::new_v4();
        let Mutation {
            name,
            invalidates,
            request,
        } = mutation;
        debug!(mutation_id = %mutation_id, mutation = name, "Running mutation");

        let guard = options
            .optimistic
            .as_ref()
            .map(|patch| PatchGuard::apply(Arc::clone(self.client.store()), mutation_id, patch));

        match request.await {
            Ok(value) => {
                if let Some(guard) = guard {
                    guard.commit();
                }
                self.client.invalidate(&invalidates).await;
                Ok(value)
            }
            Err(cause) => {
                warn!(mutation_id = %mutation_id, mutation = name, error = %cause, "Mutation failed");
                let Some(guard) = guard else {
                    return Err(MutationError::Api(cause));
                };
                let keys = guard.keys().to_vec();
                match guard.rollback() {
                    Ok(()) => Err(MutationError::Api(cause)),
                    Err(source) => {
                        error!(
                            mutation_id = %mutation_id,
                            mutation = name,
                            error = %source,
                            "Optimistic rollback failed; reloading affected keys"
                        );
                        self.client.store().mark_stale(&keys);
                        self.client.refresh_keys(&keys).await;
                        Err(MutationError::Rollback {
                            mutation_id,
                            cause,
                            source,
                        })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::client::Query;
    use crate::cache::config::CacheConfig;
    use crate::cache::entry::CacheEntry;
    use crate::cache::keys::{QueryParams, TagSet};

    fn list_key() -> CacheKey {
        CacheKey::new(
            "products",
            &QueryParams::new().with("offset", 0).with("limit", 12),
        )
    }

    fn product_tags() -> TagSet {
        [Tag::product_list()].into_iter().collect()
    }

    fn append_x() -> OptimisticPatch {
        OptimisticPatch::new(vec![list_key()], |data| {
            let mut items = data.as_array().cloned().unwrap_or_default();
            items.push(json!({"id": "x"}));
            Value::Array(items)
        })
    }

    fn seeded() -> (MutationExecutor, CacheEntry) {
        let client = Arc::new(QueryClient::new(&CacheConfig::default()));
        let key = list_key();
        let _subscription = client.store().subscribe(&key);
        client
            .store()
            .put(&key, CacheEntry::success(key.clone(), json!([{"id": "1"}]), product_tags()));
        let before = client.store().get(&key).expect("seeded entry");
        (MutationExecutor::new(client), before)
    }

    fn server_error() -> ApiError {
        ApiError::Server {
            status: 500,
            message: "boom".into(),
        }
    }

    #[tokio::test]
    async fn failed_mutation_restores_identical_entry() {
        let (executor, before) = seeded();
        let store = Arc::clone(executor.client().store());
        let observed = Arc::clone(&store);
        let mutation = Mutation::new("create", vec![Tag::product_list()], async move {
            let patched = observed.get(&list_key()).and_then(|entry| entry.item_count());
            assert_eq!(patched, Some(2));
            Err::<(), _>(server_error())
        });

        let err = executor
            .mutate(mutation, MutateOptions::optimistic(append_x()))
            .await
            .expect_err("mutation fails");

        assert!(matches!(err, MutationError::Api(ApiError::Server { status: 500, .. })));
        assert_eq!(store.get(&list_key()), Some(before));
        assert_eq!(store.pending_patches(&list_key()), 0);
    }

    #[tokio::test]
    async fn successful_mutation_commits_and_invalidates() {
        let (executor, _) = seeded();
        let client = Arc::clone(executor.client());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query = Query::from_fn(list_key(), product_tags(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!([{"id": "1"}, {"id": "2"}])) }
        });
        let _subscription = client.subscribe(&query);

        let mutation = Mutation::new("create", vec![Tag::product_list()], async { Ok(json!({"id": "2"})) });
        let created = executor
            .mutate(mutation, MutateOptions::optimistic(append_x()))
            .await
            .expect("mutation succeeds");

        assert_eq!(created, json!({"id": "2"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = client.store().get(&list_key()).expect("entry");
        assert!(entry.is_fresh());
        assert_eq!(entry.data, Some(json!([{"id": "1"}, {"id": "2"}])));
        assert_eq!(client.store().pending_patches(&list_key()), 0);
    }

    #[tokio::test]
    async fn failure_without_patch_leaves_cache_untouched() {
        let (executor, before) = seeded();
        let mutation = Mutation::new("delete", vec![Tag::product_list()], async { Err::<(), _>(server_error()) });

        let err = executor
            .mutate(mutation, MutateOptions::default())
            .await
            .expect_err("mutation fails");

        assert_eq!(err.api_error(), &server_error());
        assert_eq!(executor.client().store().get(&list_key()), Some(before));
    }

    #[tokio::test]
    async fn lost_snapshot_is_reported_as_rollback_error() {
        let (executor, _) = seeded();
        let store = Arc::clone(executor.client().store());
        let mutation = Mutation::new("create", vec![Tag::product_list()], async move {
            store.clear();
            Err::<(), _>(server_error())
        });

        let err = executor
            .mutate(mutation, MutateOptions::optimistic(append_x()))
            .await
            .expect_err("mutation fails");

        match err {
            MutationError::Rollback { cause, source, .. } => {
                assert_eq!(cause, server_error());
                let RollbackError::SnapshotMissing { keys, .. } = source;
                assert_eq!(keys, vec![list_key()]);
            }
            other => panic!("expected rollback error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn abandoned_mutation_rolls_back() {
        let (executor, before) = seeded();
        let mutation = Mutation::new("create", vec![Tag::product_list()], futures::future::pending::<Result<(), ApiError>>());

        let polled = executor
            .mutate(mutation, MutateOptions::optimistic(append_x()))
            .now_or_never();

        assert!(polled.is_none());
        assert_eq!(executor.client().store().get(&list_key()), Some(before));
    }
}
