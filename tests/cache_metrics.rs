use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tokio::sync::oneshot;
use uuid::Uuid;
use vitrine::api::ApiError;
use vitrine::cache::{
    CacheConfig, CacheKey, MutateOptions, Mutation, MutationExecutor, OptimisticPatch, Query,
    QueryClient, QueryParams, Tag, TagSet,
};
use vitrine::infra::telemetry;

fn product_list_query(calls: Arc<AtomicUsize>, offset: u32) -> Query {
    let key = CacheKey::new("products", &QueryParams::new().with("offset", offset));
    let tags: TagSet = [Tag::product_list()].into_iter().collect();
    Query::from_fn(key, tags, move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(json!([{"id": "1"}]))
        }
    })
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let client = Arc::new(QueryClient::new(&CacheConfig {
        idle_entry_limit: 1,
    }));
    let calls = Arc::new(AtomicUsize::new(0));

    // miss + fetch + dedup
    let first = product_list_query(Arc::clone(&calls), 0);
    let _watch = client.subscribe(&first);
    join_all((0..3).map(|_| client.fetch(&first))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // hit
    client.fetch(&first).await;

    // superseded: a refetch issued while the first request is parked
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let slow_key = CacheKey::new("products/search", &QueryParams::new().with("searchedText", "a"));
    let slow = Query::from_fn(slow_key, TagSet::new(), move || {
        let gate = gate.lock().expect("gate lock").take();
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(json!([]))
        }
    });
    let parked = {
        let client = Arc::clone(&client);
        let slow = slow.clone();
        tokio::spawn(async move { client.fetch(&slow).await })
    };
    tokio::task::yield_now().await;
    client.refetch(&slow).await;
    let _ = release.send(());
    parked.await.expect("parked fetch");

    // evict: two idle entries with room for one
    let second = product_list_query(Arc::clone(&calls), 12);
    let subscription = client.subscribe(&second);
    client.fetch(&second).await;
    client.unsubscribe(subscription.key());
    let third = product_list_query(Arc::clone(&calls), 24);
    client.fetch(&third).await;

    // invalidate + rollback
    let executor = MutationExecutor::new(Arc::clone(&client));
    let patch = OptimisticPatch::new(vec![first.key().clone()], |value| value.clone());
    let failed = executor
        .mutate(
            Mutation::new("delete_product", vec![Tag::product_list()], async {
                Err::<(), _>(ApiError::network("offline"))
            }),
            MutateOptions::optimistic(patch),
        )
        .await;
    assert!(failed.is_err());
    executor
        .mutate(
            Mutation::new("delete_product", vec![Tag::product_list()], async {
                Ok::<_, ApiError>(Uuid::new_v4())
            }),
            MutateOptions::default(),
        )
        .await
        .expect("mutation succeeds");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "vitrine_cache_hit_total",
        "vitrine_cache_miss_total",
        "vitrine_cache_evict_total",
        "vitrine_fetch_total",
        "vitrine_fetch_dedup_total",
        "vitrine_fetch_superseded_total",
        "vitrine_invalidate_total",
        "vitrine_mutation_rollback_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
