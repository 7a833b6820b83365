use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

/// Register descriptions for every engine metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "readthrough_cache_hit_total",
            Unit::Count,
            "Total number of cached reads served from a live entry."
        );
        describe_counter!(
            "readthrough_cache_miss_total",
            Unit::Count,
            "Total number of cached reads that found no live entry."
        );
        describe_counter!(
            "readthrough_cache_coalesced_total",
            Unit::Count,
            "Total number of misses served by another caller's fetch under single-flight."
        );
        describe_counter!(
            "readthrough_cache_fetch_error_total",
            Unit::Count,
            "Total number of failed fetches on the cached read path."
        );
        describe_gauge!(
            "readthrough_cache_entries",
            Unit::Count,
            "Current number of stored entries, expired ones included."
        );
        describe_counter!(
            "readthrough_batch_registered_total",
            Unit::Count,
            "Total number of requests registered for batching."
        );
        describe_counter!(
            "readthrough_batch_flush_total",
            Unit::Count,
            "Total number of batch flush cycles executed."
        );
        describe_histogram!(
            "readthrough_batch_flush_ms",
            Unit::Milliseconds,
            "Batch flush latency in milliseconds."
        );
        describe_counter!(
            "readthrough_batch_request_failed_total",
            Unit::Count,
            "Total number of batched requests that were rejected or abandoned."
        );
    });
}
