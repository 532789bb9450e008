//! Cache keys and invalidation tags.
//!
//! A `CacheKey` is the canonical string form of an endpoint identifier plus its
//! parameters. Parameters live in a sorted map, so construction order never
//! changes the key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use url::form_urlencoded;

/// Tag carried by every query whose payload lists products.
pub const PRODUCT_LIST_TAG: &str = "product-list";
/// Tag carried by the category listing.
pub const CATEGORY_LIST_TAG: &str = "category-list";
const PRODUCT_TAG_PREFIX: &str = "product:";

/// Ordered parameter set of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.0.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Canonical identifier of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(endpoint: &str, params: &QueryParams) -> Self {
        if params.is_empty() {
            return Self(endpoint.to_string());
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in params.iter() {
            serializer.append_pair(name, value);
        }
        Self(format!("{endpoint}?{}", serializer.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The endpoint identifier the key was built from.
    pub fn endpoint(&self) -> &str {
        self.0.split_once('?').map_or(self.0.as_str(), |(endpoint, _)| endpoint)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label grouping cache keys that are invalidated together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

pub type TagSet = BTreeSet<Tag>;

impl Tag {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn product_list() -> Self {
        Self::new(PRODUCT_LIST_TAG)
    }

    pub fn category_list() -> Self {
        Self::new(CATEGORY_LIST_TAG)
    }

    /// Per-product tag, keyed by slug on reads and by id on updates.
    pub fn product(id_or_slug: &str) -> Self {
        Self(format!("{PRODUCT_TAG_PREFIX}{id_or_slug}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
