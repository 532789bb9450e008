use reqwest::StatusCode;
use thiserror::Error;
use vitrine_api_types::ErrorEnvelope;

/// Message used when the server supplied none.
pub const GENERIC_ERROR_MESSAGE: &str = "Network error, please try again";

/// Failure of a single REST call.
///
/// Cloneable so the deduplicator can hand the same failure to every waiter and
/// the cache can keep it on the entry. Display surfaces the server's message
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No response: connection refused, timeout, TLS failure.
    #[error("{message}")]
    Network { message: String },
    #[error("{message}")]
    NotFound { message: String },
    /// Any other 4xx.
    #[error("{message}")]
    Client { status: u16, message: String },
    /// 5xx.
    #[error("{message}")]
    Server { status: u16, message: String },
    /// A 2xx response whose body did not match the expected shape.
    #[error("{message}")]
    Decode { message: String },
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn decode(detail: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: format!("failed to decode response: {detail}"),
        }
    }

    /// Map a non-success response onto the taxonomy, extracting the server's
    /// message from the error envelope when present.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.message().map(str::to_owned))
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());

        if status == StatusCode::NOT_FOUND {
            Self::NotFound { message }
        } else if status.is_server_error() {
            Self::Server {
                status: status.as_u16(),
                message,
            }
        } else {
            Self::Client {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// HTTP status when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND.as_u16()),
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Network { .. } | Self::Decode { .. } => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err)
        } else {
            Self::network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surfaces_nested_message_verbatim() {
        let err = ApiError::from_response(
            StatusCode::BAD_REQUEST,
            br#"{"data":{"message":"Price must be positive"}}"#,
        );
        assert_eq!(
            err,
            ApiError::Client {
                status: 400,
                message: "Price must be positive".into()
            }
        );
        assert_eq!(err.to_string(), "Price must be positive");
    }

    #[test]
    fn not_found_is_its_own_kind() {
        let err = ApiError::from_response(StatusCode::NOT_FOUND, b"{}");
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn server_errors_keep_status() {
        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>");
        assert_eq!(
            err,
            ApiError::Server {
                status: 502,
                message: GENERIC_ERROR_MESSAGE.into()
            }
        );
    }

    #[test]
    fn unauthorized_detection() {
        let err = ApiError::from_response(StatusCode::UNAUTHORIZED, br#"{"message":"expired"}"#);
        assert!(err.is_unauthorized());
        assert!(!ApiError::network("refused").is_unauthorized());
    }
}
