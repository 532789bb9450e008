//! Catalog service.
//!
//! Typed catalog operations expressed as cached queries and mutations. Reads
//! return the cache entry (failures are stored on it); writes are validated,
//! patched optimistically and return the server's answer.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;
use vitrine_api_types::{
    AuthRequest, AuthResponse, Category, DeleteResponse, Product, ProductCreateRequest,
    ProductUpdateRequest,
};

use crate::api::{ApiClient, ApiError, Command, Endpoint};
use crate::cache::{
    CacheEntry, CacheKey, MutateOptions, Mutation, MutationExecutor, OptimisticPatch, Query,
    QueryClient, Tag,
};

use super::error::CatalogError;
use super::patches::{append_product, placeholder_product, remove_product, rename_product};
use super::validation::Validator;

pub struct Catalog {
    api: ApiClient,
    executor: MutationExecutor,
    validator: Arc<dyn Validator>,
}

impl Catalog {
    pub fn new(api: ApiClient, client: Arc<QueryClient>, validator: Arc<dyn Validator>) -> Self {
        Self {
            api,
            executor: MutationExecutor::new(client),
            validator,
        }
    }

    pub fn client(&self) -> &Arc<QueryClient> {
        self.executor.client()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Cacheable query for an endpoint, loading through the API client.
    pub fn query(&self, endpoint: Endpoint) -> Query {
        let api = self.api.clone();
        let key = endpoint.key();
        let tags = endpoint.tags();
        Query::from_fn(key, tags, move || {
            let api = api.clone();
            let endpoint = endpoint.clone();
            async move { api.load(&endpoint).await }
        })
    }

    pub async fn read(&self, endpoint: Endpoint) -> CacheEntry {
        self.client().fetch(&self.query(endpoint)).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn categories(&self) -> CacheEntry {
        self.read(Endpoint::Categories).await
    }

    pub async fn products(&self, offset: u32, limit: u32) -> CacheEntry {
        self.read(Endpoint::Products { offset, limit }).await
    }

    pub async fn search(&self, text: &str) -> CacheEntry {
        self.read(Endpoint::Search {
            text: text.to_string(),
        })
        .await
    }

    pub async fn products_by_category(&self, category_id: &str) -> CacheEntry {
        self.read(Endpoint::ProductsByCategory {
            category_id: category_id.to_string(),
        })
        .await
    }

    pub async fn product(&self, slug: &str) -> CacheEntry {
        self.read(Endpoint::Product {
            slug: slug.to_string(),
        })
        .await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Sign in and hand the token to the session provider.
    pub async fn authenticate(&self, email: &str) -> Result<String, CatalogError> {
        self.validator.validate_sign_in(email)?;
        let body = AuthRequest {
            email: email.trim().to_string(),
        };
        let command = Command::Authenticate;
        let api = self.api.clone();
        let request = async move {
            let value = api.send(&Command::Authenticate, Some(&body)).await?;
            decode::<AuthResponse>(value)
        };

        let response = self
            .executor
            .mutate(
                Mutation::new(command.name(), command.invalidates(), request),
                MutateOptions::default(),
            )
            .await?;
        self.api.auth().store_token(&response.token)?;
        info!("Signed in");
        Ok(response.token)
    }

    /// Create a product, showing a placeholder in `optimistic_keys` until the
    /// server answers.
    pub async fn create_product(
        &self,
        request: ProductCreateRequest,
        optimistic_keys: &[CacheKey],
    ) -> Result<Product, CatalogError> {
        self.validator.validate_create(&request)?;

        let placeholder = serde_json::to_value(placeholder_product(&request))
            .map_err(|err| CatalogError::decode("placeholder product", err))?;
        let patch = OptimisticPatch::new(optimistic_keys.to_vec(), append_product(placeholder));

        let command = Command::CreateProduct;
        let api = self.api.clone();
        let mutation = Mutation::new(command.name(), command.invalidates(), async move {
            let value = api.send(&Command::CreateProduct, Some(&request)).await?;
            decode::<Product>(value)
        });

        let product = self
            .executor
            .mutate(mutation, MutateOptions::optimistic(patch))
            .await?;
        info!(product_id = %product.id, "Created product");
        Ok(product)
    }

    /// Rename a product everywhere it is cached. `slug` additionally
    /// invalidates the detail entry cached under the slug tag.
    pub async fn update_product(
        &self,
        id: &str,
        slug: Option<&str>,
        request: ProductUpdateRequest,
    ) -> Result<Product, CatalogError> {
        self.validator.validate_update(&request)?;

        let keys = self.cached_product_keys();
        let patch = OptimisticPatch::new(
            keys,
            rename_product(
                id.to_string(),
                request.name.clone(),
                request.description.clone(),
            ),
        );

        let command = Command::UpdateProduct { id: id.to_string() };
        let mut invalidates = command.invalidates();
        if let Some(slug) = slug.filter(|slug| *slug != id) {
            invalidates.push(Tag::product(slug));
        }

        let api = self.api.clone();
        let wire = command.clone();
        let mutation = Mutation::new(command.name(), invalidates, async move {
            let value = api.send(&wire, Some(&request)).await?;
            decode::<Product>(value)
        });

        let product = self
            .executor
            .mutate(mutation, MutateOptions::optimistic(patch))
            .await?;
        info!(product_id = %id, "Updated product");
        Ok(product)
    }

    /// Delete a product, hiding it from every cached list right away.
    pub async fn delete_product(&self, id: &str) -> Result<bool, CatalogError> {
        let keys = self.cached_product_keys();
        let patch = OptimisticPatch::new(keys, remove_product(id.to_string()));

        let command = Command::DeleteProduct { id: id.to_string() };
        let api = self.api.clone();
        let wire = command.clone();
        let mutation = Mutation::new(command.name(), command.invalidates(), async move {
            let value = api.send::<Value>(&wire, None).await?;
            if value.is_null() {
                return Ok(DeleteResponse { success: true });
            }
            decode::<DeleteResponse>(value)
        });

        let response = self
            .executor
            .mutate(mutation, MutateOptions::optimistic(patch))
            .await?;
        info!(product_id = %id, success = response.success, "Deleted product");
        Ok(response.success)
    }

    fn cached_product_keys(&self) -> Vec<CacheKey> {
        self.client()
            .store()
            .keys_for_tags(&[Tag::product_list()])
            .into_iter()
            .collect()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(ApiError::decode)
}

/// Decode the payload of a read entry.
///
/// Returns `Ok(None)` while nothing has loaded and the stored failure when the
/// read failed without earlier data.
pub fn decode_entry<T: DeserializeOwned>(
    entry: &CacheEntry,
    what: &'static str,
) -> Result<Option<T>, CatalogError> {
    match entry.decode::<T>() {
        Some(decoded) => decoded
            .map(Some)
            .map_err(|err| CatalogError::decode(what, err)),
        None => match CatalogError::from_entry(entry) {
            Some(err) => Err(err),
            None => Ok(None),
        },
    }
}

pub fn decode_products(entry: &CacheEntry) -> Result<Vec<Product>, CatalogError> {
    Ok(decode_entry(entry, "product list")?.unwrap_or_default())
}

pub fn decode_categories(entry: &CacheEntry) -> Result<Vec<Category>, CatalogError> {
    Ok(decode_entry(entry, "category list")?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::SessionToken;
    use crate::application::validation::RequiredFields;
    use crate::cache::{CacheConfig, QueryStatus, TagSet};

    fn catalog(server: &MockServer) -> Catalog {
        let session = Arc::new(SessionToken::new(Some("token".into())));
        let api = ApiClient::new(&server.base_url(), Duration::from_secs(5), session).expect("api");
        let client = Arc::new(QueryClient::new(&CacheConfig::default()));
        Catalog::new(api, client, Arc::new(RequiredFields))
    }

    #[tokio::test]
    async fn invalid_create_never_reaches_network_or_cache() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST").path("/products");
                then.status(201).json_body(json!({"id": "1", "name": "x"}));
            })
            .await;
        let catalog = catalog(&server);
        let key = Endpoint::Products {
            offset: 0,
            limit: 12,
        }
        .key();
        catalog
            .client()
            .store()
            .put(&key, CacheEntry::success(key.clone(), json!([]), TagSet::new()));

        let request = ProductCreateRequest {
            name: String::new(),
            description: String::new(),
            price: 1.0,
            category_id: "1".into(),
            images: vec![],
        };
        let err = catalog
            .create_product(request, std::slice::from_ref(&key))
            .await
            .expect_err("invalid");

        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(mock.calls_async().await, 0);
        assert_eq!(catalog.client().store().pending_patches(&key), 0);
    }

    #[tokio::test]
    async fn read_failure_is_stored_on_entry() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/products/missing");
                then.status(404).json_body(json!({"data": {"message": "Product not found"}}));
            })
            .await;
        let catalog = catalog(&server);

        let entry = catalog.product("missing").await;

        assert_eq!(entry.status, QueryStatus::Error);
        let err = decode_entry::<Product>(&entry, "product").expect_err("stored failure");
        assert_eq!(err.to_string(), "Product not found");
    }

    #[tokio::test]
    async fn authenticate_stores_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/auth")
                    .json_body(json!({"email": "me@example.com"}));
                then.status(200).json_body(json!({"token": "fresh"}));
            })
            .await;
        let catalog = catalog(&server);

        let token = catalog.authenticate(" me@example.com ").await.expect("sign in");

        assert_eq!(token, "fresh");
        assert_eq!(catalog.api().auth().token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn failed_update_restores_cached_names() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/products/lamp");
                then.status(200)
                    .json_body(json!({"id": "5", "slug": "lamp", "name": "Lamp"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method("PUT").path("/products/5");
                then.status(500).json_body(json!({"data": {"message": "database down"}}));
            })
            .await;
        let catalog = catalog(&server);
        let detail = catalog.product("lamp").await;

        let err = catalog
            .update_product(
                "5",
                Some("lamp"),
                ProductUpdateRequest {
                    name: "Desk lamp".into(),
                    description: "Bright".into(),
                },
            )
            .await
            .expect_err("server error");

        assert_eq!(err.to_string(), "database down");
        let key = Endpoint::Product {
            slug: "lamp".into(),
        }
        .key();
        assert_eq!(catalog.client().store().get(&key), Some(detail));
    }
}
