//! Bidirectional tag index.
//!
//! Tracks which cache keys carry which tags so a mutation can find every
//! cached query it may have made inconsistent. The index has no lock of its
//! own: it lives inside the store state and is updated under the same guard as
//! the entries, which keeps "key is under tag T iff its entry declares T" true
//! at every observable point.

use std::collections::{BTreeSet, HashMap};

use super::keys::{CacheKey, Tag, TagSet};

#[derive(Debug, Default)]
pub struct TagIndex {
    /// Maps tags to every cache key that declares them
    tag_to_keys: HashMap<Tag, BTreeSet<CacheKey>>,
    /// Maps cache keys to the tags of their current entry
    key_to_tags: HashMap<CacheKey, TagSet>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tag set of a key, replacing whatever it declared before.
    pub fn index(&mut self, key: &CacheKey, tags: &TagSet) {
        if self.key_to_tags.get(key) == Some(tags) {
            return;
        }
        self.unregister(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.key_to_tags.insert(key.clone(), tags.clone());
    }

    /// All keys declaring at least one of `tags`, in key order.
    pub fn keys_for_tags<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> BTreeSet<CacheKey> {
        let mut keys = BTreeSet::new();
        for tag in tags {
            if let Some(tagged) = self.tag_to_keys.get(tag) {
                keys.extend(tagged.iter().cloned());
            }
        }
        keys
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> TagSet {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    /// Remove a key and drop tags that no longer point anywhere.
    pub fn unregister(&mut self, key: &CacheKey) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    #[cfg(test)]
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    #[cfg(test)]
    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}
