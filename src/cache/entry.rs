//! Cache entries and their status.

use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use crate::api::ApiError;

use super::keys::{CacheKey, TagSet};

/// Lifecycle state of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Category of a stored read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    NotFound,
    Client,
    Server,
    Decode,
}

/// Read failure kept on an entry and broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl From<&ApiError> for ErrorRecord {
    fn from(err: &ApiError) -> Self {
        let kind = match err {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Client { .. } => ErrorKind::Client,
            ApiError::Server { .. } => ErrorKind::Server,
            ApiError::Decode { .. } => ErrorKind::Decode,
        };
        Self {
            kind,
            status: err.status(),
            message: err.to_string(),
        }
    }
}

/// One cached query result.
///
/// `stale` only has meaning while `status` is `Success`: the data is still
/// shown but a refetch is due.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: QueryStatus,
    pub stale: bool,
    pub data: Option<Value>,
    pub tags: TagSet,
    pub fetched_at: Option<OffsetDateTime>,
    pub subscribers: usize,
    pub error: Option<ErrorRecord>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, status: QueryStatus) -> Self {
        Self {
            key,
            status,
            stale: false,
            data: None,
            tags: TagSet::new(),
            fetched_at: None,
            subscribers: 0,
            error: None,
        }
    }

    /// Successful entry holding `data`, as produced by a direct `put`.
    pub fn success(key: CacheKey, data: Value, tags: TagSet) -> Self {
        Self {
            status: QueryStatus::Success,
            data: Some(data),
            tags,
            fetched_at: Some(OffsetDateTime::now_utc()),
            ..Self::new(key, QueryStatus::Success)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Successful and not marked stale; served without a network call.
    pub fn is_fresh(&self) -> bool {
        self.is_success() && !self.stale
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    /// Record a network outcome on the entry.
    ///
    /// Failures keep the previous payload so consumers can keep showing it.
    pub(crate) fn apply_result(&mut self, tags: &TagSet, result: &Result<Value, ApiError>) {
        match result {
            Ok(data) => {
                self.status = QueryStatus::Success;
                self.data = Some(data.clone());
                self.error = None;
                self.fetched_at = Some(OffsetDateTime::now_utc());
            }
            Err(err) => {
                self.status = QueryStatus::Error;
                self.error = Some(ErrorRecord::from(err));
            }
        }
        self.stale = false;
        self.tags = tags.clone();
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.data.as_ref().map(|data| T::deserialize(data))
    }

    /// Number of items when the payload is an array.
    pub fn item_count(&self) -> Option<usize> {
        self.data.as_ref().and_then(Value::as_array).map(Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::keys::{QueryParams, Tag};

    fn key() -> CacheKey {
        CacheKey::new("products", &QueryParams::new().with("offset", 0))
    }

    #[test]
    fn failure_keeps_previous_data() {
        let tags: TagSet = [Tag::product_list()].into_iter().collect();
        let mut entry = CacheEntry::success(key(), json!([{"id": "1"}]), tags.clone());
        entry.stale = true;

        entry.apply_result(&tags, &Err(ApiError::network("connection refused")));

        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.data, Some(json!([{"id": "1"}])));
        assert!(!entry.stale);
        let error = entry.error.expect("error recorded");
        assert_eq!(error.kind, ErrorKind::Network);
        assert_eq!(error.message, "connection refused");
    }

    #[test]
    fn success_clears_error() {
        let mut entry = CacheEntry::new(key(), QueryStatus::Loading);
        entry.apply_result(&TagSet::new(), &Err(ApiError::decode("bad json")));
        entry.apply_result(&TagSet::new(), &Ok(json!([])));
        assert!(entry.is_fresh());
        assert!(entry.error.is_none());
        assert_eq!(entry.item_count(), Some(0));
    }

    #[test]
    fn decode_typed_payload() {
        let entry = CacheEntry::success(key(), json!(["a", "b"]), TagSet::new());
        let items: Vec<String> = entry.decode().expect("payload").expect("decode");
        assert_eq!(items, ["a", "b"]);
        assert!(CacheEntry::new(key(), QueryStatus::Idle).decode::<Vec<String>>().is_none());
    }

    #[test]
    fn error_record_carries_status() {
        let record = ErrorRecord::from(&ApiError::Server {
            status: 503,
            message: "maintenance".into(),
        });
        assert_eq!(record.kind, ErrorKind::Server);
        assert_eq!(record.status, Some(503));
    }
}
