use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber. Fails if one is already set.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
    }
}

/// Register descriptions for every metric the service emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_cache_hit_total",
            Unit::Count,
            "Artifact cache lookups served from the store."
        );
        describe_counter!(
            "pressroom_cache_miss_total",
            Unit::Count,
            "Artifact cache lookups that found nothing."
        );
        describe_counter!(
            "pressroom_cache_error_total",
            Unit::Count,
            "Artifact cache operations absorbed after a store failure."
        );
        describe_counter!(
            "pressroom_cache_set_total",
            Unit::Count,
            "Artifacts written to the cache."
        );
        describe_counter!(
            "pressroom_ratelimit_allowed_total",
            Unit::Count,
            "Requests admitted by the token bucket."
        );
        describe_counter!(
            "pressroom_ratelimit_denied_total",
            Unit::Count,
            "Requests rejected by the token bucket."
        );
        describe_counter!(
            "pressroom_ratelimit_store_error_total",
            Unit::Count,
            "Rate limit checks admitted because the store failed."
        );
        describe_counter!(
            "pressroom_task_submitted_total",
            Unit::Count,
            "Tasks queued, by kind."
        );
        describe_counter!(
            "pressroom_task_retry_total",
            Unit::Count,
            "Task retries scheduled, by kind."
        );
        describe_counter!(
            "pressroom_task_failed_total",
            Unit::Count,
            "Tasks that ended FAILED, by kind."
        );
        describe_counter!(
            "pressroom_task_succeeded_total",
            Unit::Count,
            "Tasks that ended SUCCESS, by kind."
        );
        describe_histogram!(
            "pressroom_task_duration_ms",
            Unit::Milliseconds,
            "Handler run time per attempt in milliseconds."
        );
        describe_gauge!(
            "pressroom_active_requests",
            Unit::Count,
            "Requests in flight at the last load publication."
        );
        describe_gauge!(
            "pressroom_avg_response_time_seconds",
            Unit::Seconds,
            "Mean response time over the recent window."
        );
        describe_gauge!(
            "pressroom_target_rate_per_minute",
            Unit::Count,
            "Adaptive admission rate derived from the last published load."
        );
        describe_counter!(
            "pressroom_reaper_cleaned_total",
            Unit::Count,
            "Stale scratch artifacts deleted."
        );
        describe_counter!(
            "pressroom_reaper_error_total",
            Unit::Count,
            "Scratch entries the reaper failed to inspect or delete."
        );
    });
}
