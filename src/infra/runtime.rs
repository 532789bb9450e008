//! Wires the catalog services from resolved settings.

use std::sync::Arc;

use tracing::info;

use crate::api::{ApiClient, AuthProvider, TokenFile};
use crate::application::browse::BrowseSession;
use crate::application::catalog::Catalog;
use crate::application::validation::RequiredFields;
use crate::cache::{CacheConfig, QueryClient};
use crate::config::Settings;

use super::error::InfraError;

/// Build the catalog service with the session token kept in the configured file.
pub fn build_catalog(settings: &Settings) -> Result<Arc<Catalog>, InfraError> {
    let auth = TokenFile::open(&settings.api.token_file)?;
    build_catalog_with_auth(settings, Arc::new(auth))
}

pub fn build_catalog_with_auth(
    settings: &Settings,
    auth: Arc<dyn AuthProvider>,
) -> Result<Arc<Catalog>, InfraError> {
    let api = ApiClient::new(
        settings.api.base_url.as_str(),
        settings.api.request_timeout,
        auth,
    )?;
    let client = Arc::new(QueryClient::new(&CacheConfig::from(&settings.cache)));
    info!(
        base_url = %settings.api.base_url,
        idle_entry_limit = settings.cache.idle_entry_limit,
        "Catalog client ready"
    );
    Ok(Arc::new(Catalog::new(api, client, Arc::new(RequiredFields))))
}

pub fn browse_session(settings: &Settings, catalog: Arc<Catalog>) -> BrowseSession {
    BrowseSession::new(catalog, settings.pagination.page_size)
}
