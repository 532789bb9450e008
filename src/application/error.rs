use thiserror::Error;

use crate::api::ApiError;
use crate::cache::{CacheEntry, ErrorKind, MutationError};

use super::validation::ValidationError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("unexpected {what} payload: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to store session token: {0}")]
    Session(#[from] std::io::Error),
}

impl CatalogError {
    pub fn decode(what: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { what, source }
    }

    /// The API failure behind this error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            Self::Mutation(err) => Some(err.api_error()),
            Self::Validation(_) | Self::Decode { .. } | Self::Session(_) => None,
        }
    }

    /// Turn the failure stored on a read entry back into an error.
    pub fn from_entry(entry: &CacheEntry) -> Option<Self> {
        let record = entry.error.as_ref()?;
        let message = record.message.clone();
        let err = match (record.kind, record.status) {
            (ErrorKind::NotFound, _) => ApiError::NotFound { message },
            (ErrorKind::Server, Some(status)) => ApiError::Server { status, message },
            (ErrorKind::Client, Some(status)) => ApiError::Client { status, message },
            (ErrorKind::Decode, _) => ApiError::Decode { message },
            _ => ApiError::Network { message },
        };
        Some(Self::Api(err))
    }
}
