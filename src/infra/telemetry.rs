//! Global `tracing` subscriber and metric descriptions.
//!
//! The service event log (target `revalidator::events`) is filtered by
//! `logging.event_level` so its floor holds even when the general level is
//! stricter. Everything else follows `logging.level` and `RUST_LOG`.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    filter::Directive,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::logger::{EVENT_TARGET, LogLevel};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber for `logging`.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy()
        .add_directive(event_directive(logging.event_level)?);

    // flattened so `source` and `context` sit beside the message
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("tracing subscriber already set: {err}")))
}

fn event_directive(level: LogLevel) -> Result<Directive, InfraError> {
    format!("{EVENT_TARGET}={level}")
        .parse()
        .map_err(|err| InfraError::telemetry(format!("event log directive: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "revalidator_webhook_requests_total",
            Unit::Count,
            "Webhook requests by outcome."
        );
        describe_counter!(
            "revalidator_invalidations_total",
            Unit::Count,
            "Single-path invalidations by outcome."
        );
        describe_counter!(
            "revalidator_breaker_rejections_total",
            Unit::Count,
            "Calls rejected by an open circuit breaker."
        );
        describe_counter!(
            "revalidator_rate_limit_denied_total",
            Unit::Count,
            "Requests denied by a rate limiter."
        );
        describe_gauge!(
            "revalidator_queue_pending",
            Unit::Count,
            "Revalidation tasks waiting in the queue at the last health check."
        );
        describe_histogram!(
            "revalidator_operation_ms",
            Unit::Milliseconds,
            "Latency of timed operations such as revalidation batches and health checks."
        );
    });
}
