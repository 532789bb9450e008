//! REST transport for the catalog API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::QueryParams;

use super::auth::AuthProvider;
use super::endpoints::{Command, Endpoint};
use super::error::ApiError;

#[derive(Debug, Error)]
pub enum ApiSetupError {
    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("base URL cannot carry a path: {0}")]
    NotABase(String),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    auth: Arc<dyn AuthProvider>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, ApiSetupError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(ApiSetupError::NotABase(base_url.to_string()));
        }
        let http = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base, auth })
    }

    pub fn user_agent() -> &'static str {
        concat!("vitrine/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    /// Resolve path segments and query parameters against the base URL.
    pub fn url(&self, segments: &[String], params: &QueryParams) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| ApiError::network(format!("base URL {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    /// Perform the read behind an endpoint.
    pub async fn load(&self, endpoint: &Endpoint) -> Result<Value, ApiError> {
        let url = self.url(&endpoint.segments(), &endpoint.params())?;
        self.execute(self.http.request(Method::GET, url)).await
    }

    /// Perform a write, optionally with a JSON body.
    pub async fn send<B>(&self, command: &Command, body: Option<&B>) -> Result<Value, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(&command.segments(), &QueryParams::new())?;
        let mut request = self.http.request(command.method(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let request = match self.auth.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let bytes = response.bytes().await?;
        debug!(%url, status = status.as_u16(), bytes = bytes.len(), "API response");

        if !status.is_success() {
            let err = ApiError::from_response(status, &bytes);
            if status == StatusCode::UNAUTHORIZED {
                warn!(%url, "Request unauthorized; redirecting to login");
                self.auth.redirect_to_login();
            }
            return Err(err);
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(ApiError::decode)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::auth::SessionToken;

    fn client(server: &MockServer, session: Arc<SessionToken>) -> ApiClient {
        ApiClient::new(&server.base_url(), Duration::from_secs(5), session).expect("client")
    }

    #[test]
    fn url_keeps_base_path_and_encodes_segments() {
        let session = Arc::new(SessionToken::default());
        let client = ApiClient::new("https://api.example.com/v1/", Duration::from_secs(1), session)
            .expect("client");
        let url = client
            .url(
                &["products".to_string(), "desk lamp".to_string()],
                &QueryParams::new().with("limit", 12),
            )
            .expect("url");
        assert_eq!(url.as_str(), "https://api.example.com/v1/products/desk%20lamp?limit=12");
    }

    #[test]
    fn rejects_non_base_url() {
        let session = Arc::new(SessionToken::default());
        let err = ApiClient::new("mailto:shop@example.com", Duration::from_secs(1), session)
            .err()
            .expect("non-base url rejected");
        assert!(matches!(err, ApiSetupError::NotABase(_)));
    }

    #[tokio::test]
    async fn load_sends_bearer_token_and_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("GET")
                    .path("/products")
                    .query_param("offset", "0")
                    .query_param("limit", "12")
                    .header("authorization", "Bearer abc");
                then.status(200).json_body(json!([{"id": "1"}]));
            })
            .await;

        let api = client(&server, Arc::new(SessionToken::new(Some("abc".into()))));
        let value = api
            .load(&Endpoint::Products {
                offset: 0,
                limit: 12,
            })
            .await
            .expect("products");

        mock.assert_async().await;
        assert_eq!(value, json!([{"id": "1"}]));
    }

    #[tokio::test]
    async fn error_envelope_message_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/products");
                then.status(400)
                    .json_body(json!({"data": {"message": "Name is required"}}));
            })
            .await;

        let api = client(&server, Arc::new(SessionToken::new(Some("abc".into()))));
        let err = api
            .send(&Command::CreateProduct, Some(&json!({})))
            .await
            .expect_err("bad request");

        assert_eq!(
            err,
            ApiError::Client {
                status: 400,
                message: "Name is required".into()
            }
        );
    }

    #[tokio::test]
    async fn unauthorized_redirects_to_login() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("DELETE").path("/products/5");
                then.status(401).json_body(json!({"message": "jwt expired"}));
            })
            .await;

        let session = Arc::new(SessionToken::new(Some("old".into())));
        let api = client(&server, Arc::clone(&session));
        let err = api
            .send::<Value>(&Command::DeleteProduct { id: "5".into() }, None)
            .await
            .expect_err("unauthorized");

        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "jwt expired");
        assert_eq!(session.redirects(), 1);
        assert!(session.token().is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let session = Arc::new(SessionToken::default());
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_millis(500), session)
            .expect("client");
        let err = api.load(&Endpoint::Categories).await.expect_err("no server");
        assert!(matches!(err, ApiError::Network { .. }));
    }
}
