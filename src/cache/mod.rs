//! Vitrine query cache.
//!
//! Client-side data synchronization between consumers and the catalog API:
//!
//! - **Store**: one entry per canonical key, published to subscribers
//! - **Deduplicator**: one request in flight per key, newest request wins
//! - **Tag index**: maps tags such as `product-list` to the keys declaring them
//! - **Mutation executor**: optimistic patches with exact rollback
//!
//! ## Configuration
//!
//! Idle retention is controlled via `vitrine.toml`:
//!
//! ```toml
//! [cache]
//! idle_entry_limit = 50
//! ```

mod client;
mod config;
mod dedup;
mod entry;
mod keys;
pub(crate) mod lock;
mod mutation;
mod registry;
mod store;

pub use client::{Invalidation, Query, QueryClient};
pub use config::CacheConfig;
pub use dedup::{Deduplicator, FetchResult, Loader};
pub use entry::{CacheEntry, ErrorKind, ErrorRecord, QueryStatus};
pub use keys::{CATEGORY_LIST_TAG, CacheKey, PRODUCT_LIST_TAG, QueryParams, Tag, TagSet};
pub use mutation::{MutateOptions, Mutation, MutationError, MutationExecutor, OptimisticPatch};
pub use registry::TagIndex;
pub use store::{CacheStore, Generation, PatchFn, PatchReceipt, RollbackError, Subscription};
