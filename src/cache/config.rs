//! Cache configuration.
//!
//! Controls the keep-alive policy for entries nobody subscribes to, via the
//! `[cache]` section of `vitrine.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_IDLE_ENTRY_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Unsubscribed entries kept (LRU) before eviction; 0 evicts on the last
    /// unsubscribe.
    pub idle_entry_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_entry_limit: DEFAULT_IDLE_ENTRY_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            idle_entry_limit: settings.idle_entry_limit,
        }
    }
}

impl CacheConfig {
    /// Capacity of the idle LRU, or `None` when idle entries are not retained.
    pub fn idle_limit_non_zero(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.idle_entry_limit)
    }
}
