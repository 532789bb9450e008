use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Events go to stderr so command output on stdout stays machine readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "vitrine_cache_hit_total",
            Unit::Count,
            "Total number of reads served from a fresh cache entry."
        );
        describe_counter!(
            "vitrine_cache_miss_total",
            Unit::Count,
            "Total number of reads that needed a network fetch."
        );
        describe_counter!(
            "vitrine_cache_evict_total",
            Unit::Count,
            "Total number of cache entries evicted after losing their last subscriber."
        );
        describe_counter!(
            "vitrine_fetch_total",
            Unit::Count,
            "Total number of network fetches issued."
        );
        describe_counter!(
            "vitrine_fetch_dedup_total",
            Unit::Count,
            "Total number of fetches joined onto a request already in flight."
        );
        describe_counter!(
            "vitrine_fetch_superseded_total",
            Unit::Count,
            "Total number of responses discarded because a later request was issued."
        );
        describe_counter!(
            "vitrine_invalidate_total",
            Unit::Count,
            "Total number of tag invalidations."
        );
        describe_counter!(
            "vitrine_mutation_rollback_total",
            Unit::Count,
            "Total number of optimistic patches rolled back."
        );
    });
}
