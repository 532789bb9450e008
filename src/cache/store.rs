//! Cache store.
//!
//! One entry per cache key, plus the tag index, the idle LRU and the pending
//! optimistic patch layers. Every write goes through the single state mutex,
//! which serializes writers to the same key and keeps the tag index in step
//! with the entries.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::stream::{self, Stream};
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::ApiError;

use super::config::CacheConfig;
use super::entry::{CacheEntry, QueryStatus};
use super::keys::{CacheKey, Tag, TagSet};
use super::lock::mutex_lock;
use super::registry::TagIndex;

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EVICT_TOTAL: &str = "vitrine_cache_evict_total";
const METRIC_FETCH_SUPERSEDED_TOTAL: &str = "vitrine_fetch_superseded_total";

/// Monotonic number assigned to every issued network request.
pub type Generation = u64;

/// Pure transformation of an entry payload, applied by an optimistic patch.
pub type PatchFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Keys actually patched by one mutation; handed back for commit or rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReceipt {
    pub mutation_id: Uuid,
    pub keys: Vec<CacheKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollbackError {
    #[error("snapshot of mutation {mutation_id} is gone for {} key(s)", keys.len())]
    SnapshotMissing {
        mutation_id: Uuid,
        keys: Vec<CacheKey>,
    },
}

struct PatchLayer {
    mutation_id: Uuid,
    /// Entry as it was right before this layer was applied.
    snapshot: CacheEntry,
    apply: PatchFn,
}

struct Slot {
    entry: CacheEntry,
    sender: watch::Sender<CacheEntry>,
    /// Greatest generation issued for this key.
    issued: Generation,
    /// Pending optimistic layers, oldest first.
    patches: Vec<PatchLayer>,
}

impl Slot {
    fn new(entry: CacheEntry) -> Self {
        let (sender, _) = watch::channel(entry.clone());
        Self {
            entry,
            sender,
            issued: 0,
            patches: Vec::new(),
        }
    }

    fn publish(&self) {
        self.sender.send_replace(self.entry.clone());
    }

    /// Update the subscriber count without waking subscribers.
    fn set_subscribers(&mut self, count: usize) {
        self.entry.subscribers = count;
        self.sender.send_if_modified(|current| {
            current.subscribers = count;
            false
        });
    }

    /// Make `base` the state under the pending patches and re-apply them in
    /// order, refreshing each layer's snapshot.
    fn rebase(&mut self, base: CacheEntry) {
        let mut current = base;
        for layer in &mut self.patches {
            layer.snapshot = current.clone();
            if let Some(data) = current.data.as_ref() {
                current.data = Some((layer.apply)(data));
            }
        }
        self.entry = current;
    }
}

struct StoreState {
    slots: HashMap<CacheKey, Slot>,
    tags: TagIndex,
    /// Unsubscribed keys kept alive, least recently idled first out.
    idle: Option<LruCache<CacheKey, ()>>,
}

impl StoreState {
    fn remove_slot(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.tags.unregister(key);
        if let Some(idle) = self.idle.as_mut() {
            idle.pop(key);
        }
        let slot = self.slots.remove(key)?;
        if !slot.patches.is_empty() {
            warn!(
                cache_key = %key,
                pending_patches = slot.patches.len(),
                "Evicted cache entry with pending optimistic patches"
            );
        }
        Some(slot.entry)
    }

    /// Hand an unsubscribed key to the keep-alive policy.
    fn park_idle(&mut self, key: &CacheKey) {
        let evicted = match self.idle.as_mut() {
            None => Some(key.clone()),
            Some(idle) => idle
                .push(key.clone(), ())
                .map(|(evicted, ())| evicted)
                .filter(|evicted| evicted != key),
        };
        if let Some(evicted) = evicted {
            self.remove_slot(&evicted);
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
            debug!(cache_key = %evicted, "Evicted idle cache entry");
        }
    }
}

/// Shared cache of query results.
///
/// Injected wherever cached data is read or written; no other component holds
/// mutable cache state.
pub struct CacheStore {
    state: Mutex<StoreState>,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(StoreState {
                slots: HashMap::new(),
                tags: TagIndex::new(),
                idle: config.idle_limit_non_zero().map(LruCache::new),
            }),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        mutex_lock(&self.state, SOURCE, "get")
            .slots
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.state, SOURCE, "contains")
            .slots
            .contains_key(key)
    }

    pub fn subscribers(&self, key: &CacheKey) -> usize {
        mutex_lock(&self.state, SOURCE, "subscribers")
            .slots
            .get(key)
            .map_or(0, |slot| slot.entry.subscribers)
    }

    /// Keys whose current entry declares at least one of `tags`.
    pub fn keys_for_tags(&self, tags: &[Tag]) -> BTreeSet<CacheKey> {
        mutex_lock(&self.state, SOURCE, "keys_for_tags")
            .tags
            .keys_for_tags(tags)
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> TagSet {
        mutex_lock(&self.state, SOURCE, "tags_for_key")
            .tags
            .tags_for_key(key)
    }

    /// Number of optimistic layers currently applied on `key`.
    pub fn pending_patches(&self, key: &CacheKey) -> usize {
        mutex_lock(&self.state, SOURCE, "pending_patches")
            .slots
            .get(key)
            .map_or(0, |slot| slot.patches.len())
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Register interest in `key`, creating a loading entry on first use.
    pub fn subscribe(&self, key: &CacheKey) -> Subscription {
        let mut guard = mutex_lock(&self.state, SOURCE, "subscribe");
        let state = &mut *guard;
        if let Some(idle) = state.idle.as_mut() {
            idle.pop(key);
        }
        let slot = state
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(CacheEntry::new(key.clone(), QueryStatus::Loading)));
        let count = slot.entry.subscribers + 1;
        slot.set_subscribers(count);
        Subscription {
            key: key.clone(),
            receiver: slot.sender.subscribe(),
        }
    }

    /// Drop one subscriber; returns how many remain.
    pub fn unsubscribe(&self, key: &CacheKey) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "unsubscribe");
        let Some(slot) = state.slots.get_mut(key) else {
            return 0;
        };
        let remaining = slot.entry.subscribers.saturating_sub(1);
        slot.set_subscribers(remaining);
        if remaining == 0 {
            state.park_idle(key);
        }
        remaining
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write an entry directly and re-index its tags.
    ///
    /// Pending optimistic patches are replayed on top of the written entry.
    pub fn put(&self, key: &CacheKey, mut entry: CacheEntry) {
        let mut guard = mutex_lock(&self.state, SOURCE, "put");
        let state = &mut *guard;
        entry.key = key.clone();
        state.tags.index(key, &entry.tags);

        let created = !state.slots.contains_key(key);
        let slot = state
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(CacheEntry::new(key.clone(), QueryStatus::Idle)));
        entry.subscribers = slot.entry.subscribers;
        if slot.patches.is_empty() {
            slot.entry = entry;
        } else {
            slot.rebase(entry);
        }
        slot.publish();

        if created {
            state.park_idle(key);
        }
    }

    /// Flip successful entries to stale, keeping their data.
    ///
    /// Returns the keys that were flipped.
    pub fn mark_stale<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) -> Vec<CacheKey> {
        let mut state = mutex_lock(&self.state, SOURCE, "mark_stale");
        let mut flipped = Vec::new();
        for key in keys {
            let Some(slot) = state.slots.get_mut(key) else {
                continue;
            };
            for layer in &mut slot.patches {
                if layer.snapshot.is_success() {
                    layer.snapshot.stale = true;
                }
            }
            if slot.entry.is_fresh() {
                slot.entry.stale = true;
                slot.publish();
                flipped.push(key.clone());
            }
        }
        flipped
    }

    pub fn evict(&self, key: &CacheKey) -> Option<CacheEntry> {
        let evicted = mutex_lock(&self.state, SOURCE, "evict").remove_slot(key);
        if evicted.is_some() {
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
        evicted
    }

    /// Drop every entry. Open subscriptions observe the end of their stream.
    pub fn clear(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        state.slots.clear();
        state.tags.clear();
        if let Some(idle) = state.idle.as_mut() {
            idle.clear();
        }
    }

    // ========================================================================
    // Fetch protocol (driven by the deduplicator)
    // ========================================================================

    /// Record that `generation` was issued for `key` and publish the loading
    /// state. Entries that already hold data keep showing it.
    pub(crate) fn begin_fetch(&self, key: &CacheKey, generation: Generation) {
        let mut guard = mutex_lock(&self.state, SOURCE, "begin_fetch");
        let state = &mut *guard;
        let created = !state.slots.contains_key(key);
        let slot = state
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(CacheEntry::new(key.clone(), QueryStatus::Loading)));
        slot.issued = slot.issued.max(generation);
        if matches!(slot.entry.status, QueryStatus::Idle | QueryStatus::Error) {
            slot.entry.status = QueryStatus::Loading;
            slot.publish();
        }
        if created {
            state.park_idle(key);
        }
    }

    /// Apply the outcome of request `generation`.
    ///
    /// A request older than the newest one issued for the key is not written;
    /// its waiters get a detached view of their own outcome instead.
    pub(crate) fn resolve(
        &self,
        key: &CacheKey,
        generation: Generation,
        tags: &TagSet,
        result: &Result<Value, ApiError>,
    ) -> CacheEntry {
        let mut guard = mutex_lock(&self.state, SOURCE, "resolve");
        let state = &mut *guard;
        let Some(slot) = state.slots.get_mut(key) else {
            let mut detached = CacheEntry::new(key.clone(), QueryStatus::Loading);
            detached.apply_result(tags, result);
            return detached;
        };

        if generation < slot.issued {
            counter!(METRIC_FETCH_SUPERSEDED_TOTAL).increment(1);
            debug!(
                cache_key = %key,
                generation,
                newest = slot.issued,
                "Discarded response superseded by a newer request"
            );
            let mut detached = slot.entry.clone();
            detached.apply_result(tags, result);
            return detached;
        }

        let mut base = slot
            .patches
            .first()
            .map_or_else(|| slot.entry.clone(), |layer| layer.snapshot.clone());
        base.apply_result(tags, result);
        base.subscribers = slot.entry.subscribers;
        slot.rebase(base);
        slot.publish();
        let entry = slot.entry.clone();
        state.tags.index(key, tags);
        entry
    }

    // ========================================================================
    // Optimistic patches
    // ========================================================================

    /// Snapshot and patch every listed entry that currently holds data.
    ///
    /// Patches on the same key stack in application order; each layer keeps
    /// the snapshot taken right before it.
    pub fn apply_patch(&self, mutation_id: Uuid, keys: &[CacheKey], apply: &PatchFn) -> PatchReceipt {
        let mut state = mutex_lock(&self.state, SOURCE, "apply_patch");
        let mut patched = Vec::new();
        let unique: BTreeSet<&CacheKey> = keys.iter().collect();
        for key in unique {
            let Some(slot) = state.slots.get_mut(key) else {
                continue;
            };
            let Some(data) = slot.entry.data.as_ref() else {
                continue;
            };
            let next = apply(data);
            slot.patches.push(PatchLayer {
                mutation_id,
                snapshot: slot.entry.clone(),
                apply: Arc::clone(apply),
            });
            slot.entry.data = Some(next);
            slot.publish();
            patched.push(key.clone());
        }
        PatchReceipt {
            mutation_id,
            keys: patched,
        }
    }

    /// Confirm a mutation: its layers are dropped, the patched data stays.
    pub fn commit_patch(&self, receipt: &PatchReceipt) {
        let mut state = mutex_lock(&self.state, SOURCE, "commit_patch");
        for key in &receipt.keys {
            if let Some(slot) = state.slots.get_mut(key) {
                slot.patches
                    .retain(|layer| layer.mutation_id != receipt.mutation_id);
            }
        }
    }

    /// Restore every entry patched by the mutation from its snapshot.
    ///
    /// Layers applied after this one are replayed on the restored state. Keys
    /// whose snapshot no longer exists (entry evicted or cleared) are reported
    /// in the error; every other key is still restored.
    pub fn rollback_patch(&self, receipt: &PatchReceipt) -> Result<(), RollbackError> {
        let mut state = mutex_lock(&self.state, SOURCE, "rollback_patch");
        let mut missing = Vec::new();
        for key in &receipt.keys {
            let Some(slot) = state.slots.get_mut(key) else {
                missing.push(key.clone());
                continue;
            };
            let Some(index) = slot
                .patches
                .iter()
                .position(|layer| layer.mutation_id == receipt.mutation_id)
            else {
                missing.push(key.clone());
                continue;
            };
            let layer = slot.patches.remove(index);
            let mut base = layer.snapshot;
            base.subscribers = slot.entry.subscribers;
            let later: Vec<PatchLayer> = slot.patches.drain(index..).collect();
            let below = std::mem::replace(&mut slot.patches, later);
            slot.rebase(base);
            let above = std::mem::replace(&mut slot.patches, below);
            slot.patches.extend(above);
            slot.publish();
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RollbackError::SnapshotMissing {
                mutation_id: receipt.mutation_id,
                keys: missing,
            })
        }
    }
}

/// Live view of one cache key.
#[derive(Debug, Clone)]
pub struct Subscription {
    key: CacheKey,
    receiver: watch::Receiver<CacheEntry>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Latest published entry.
    pub fn current(&self) -> CacheEntry {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published update. `None` once the entry is evicted.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the entry is no longer loading.
    pub async fn settled(&mut self) -> Option<CacheEntry> {
        loop {
            let current = self.receiver.borrow_and_update().clone();
            if !current.is_loading() {
                return Some(current);
            }
            self.receiver.changed().await.ok()?;
        }
    }

    /// Every subsequent update as a stream.
    pub fn into_stream(self) -> impl Stream<Item = CacheEntry> {
        stream::unfold(self.receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let entry = receiver.borrow_and_update().clone();
            Some((entry, receiver))
        })
    }
}
