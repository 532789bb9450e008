//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vitrine";
const DEFAULT_BASE_URL: &str = "https://api.bitechx.com";
const DEFAULT_TOKEN_FILE: &str = ".vitrine-token";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_ENTRY_LIMIT: usize = 50;
const DEFAULT_QUIET_PERIOD_MS: u64 = 300;
const DEFAULT_PAGE_SIZE: u64 = 12;

/// Command-line arguments for the vitrine binary.
#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about = "Catalog client with a query cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "VITRINE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the session token.
    Login {
        #[arg(long)]
        email: String,
    },
    /// List categories.
    Categories,
    /// List products, optionally filtered.
    Products(ProductsArgs),
    /// Show a single product.
    Product {
        /// Product slug or id.
        slug: String,
    },
    /// Create a product.
    Create(CreateArgs),
    /// Rename a product.
    Update(UpdateArgs),
    /// Delete a product.
    Delete {
        /// Product id.
        id: String,
    },
    /// Interactive listing: type to search, `/next`, `/prev`, `/page N`,
    /// `/category ID`, `/all`, `/quit`.
    Browse,
}

#[derive(Debug, Args, Clone, PartialEq, Default)]
pub struct ProductsArgs {
    /// 1-based page of the unfiltered listing.
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Only products of this category.
    #[arg(long = "category", value_name = "ID", conflicts_with = "search")]
    pub category: Option<String>,

    /// Full-text search instead of paging.
    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,
}

#[derive(Debug, Args, Clone, PartialEq)]
pub struct CreateArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long)]
    pub price: f64,

    #[arg(long = "category", value_name = "ID")]
    pub category_id: String,

    /// Image URL; repeat for several.
    #[arg(long = "image", value_name = "URL")]
    pub images: Vec<String>,
}

#[derive(Debug, Args, Clone, PartialEq)]
pub struct UpdateArgs {
    /// Product id.
    pub id: String,

    /// Slug the product detail is cached under, when it differs from the id.
    #[arg(long)]
    pub slug: Option<String>,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub description: String,
}

#[derive(Debug, Args, Default, Clone, PartialEq)]
pub struct Overrides {
    /// Override the catalog API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override where the session token is kept.
    #[arg(
        long = "api-token-file",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub api_token_file: Option<PathBuf>,

    /// Override the per-request timeout.
    #[arg(long = "api-request-timeout-secs", value_name = "SECONDS", global = true)]
    pub api_request_timeout_secs: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override how many unsubscribed entries stay cached.
    #[arg(long = "cache-idle-entry-limit", value_name = "COUNT", global = true)]
    pub cache_idle_entry_limit: Option<usize>,

    /// Override the search debounce quiet period.
    #[arg(long = "search-quiet-period-ms", value_name = "MILLIS", global = true)]
    pub search_quiet_period_ms: Option<u64>,

    /// Override the listing page size.
    #[arg(long = "page-size", value_name = "COUNT", global = true)]
    pub page_size: Option<u64>,
}

/// Fully-resolved client settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub pagination: PaginationSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub token_file: PathBuf,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub idle_entry_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub quiet_period: Duration,
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub page_size: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VITRINE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    search: RawSearchSettings,
    pagination: RawPaginationSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(path) = overrides.api_token_file.as_ref() {
            self.api.token_file = Some(path.clone());
        }
        if let Some(seconds) = overrides.api_request_timeout_secs {
            self.api.request_timeout_secs = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.cache_idle_entry_limit {
            self.cache.idle_entry_limit = Some(limit);
        }
        if let Some(millis) = overrides.search_quiet_period_ms {
            self.search.quiet_period_ms = Some(millis);
        }
        if let Some(size) = overrides.page_size {
            self.pagination.page_size = Some(size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            logging,
            cache,
            search,
            pagination,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            logging: build_logging_settings(logging)?,
            cache: CacheSettings {
                idle_entry_limit: cache.idle_entry_limit.unwrap_or(DEFAULT_IDLE_ENTRY_LIMIT),
            },
            search: SearchSettings {
                quiet_period: Duration::from_millis(
                    search.quiet_period_ms.unwrap_or(DEFAULT_QUIET_PERIOD_MS),
                ),
            },
            pagination: PaginationSettings {
                page_size: non_zero_u32(
                    pagination.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
                    "pagination.page_size",
                )?,
            },
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("api.base_url", format!("`{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let token_file = api
        .token_file
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));

    let timeout_secs = api
        .request_timeout_secs
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.request_timeout_secs",
            "must be greater than zero",
        ));
    }

    Ok(ApiSettings {
        base_url,
        token_file,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    token_file: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    idle_entry_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    quiet_period_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    page_size: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
