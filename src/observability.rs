// src/observability.rs
//! Logging and metrics setup
//!
//! - **Logging**: `tracing-subscriber` fmt layer with `EnvFilter`, plain or JSON
//! - **Metrics**: `metrics` facade with a Prometheus recorder
//!
//! A second call to either initialiser returns an error instead of panicking.

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Metric names emitted by the engine
pub mod metric_names {
    /// Jobs processed, labelled by `job` and `outcome`
    pub const JOBS_PROCESSED: &str = "host_engine_jobs_processed_total";
    pub const JOB_DURATION: &str = "host_engine_job_duration_seconds";
    pub const DRAINS_STARTED: &str = "host_engine_drains_started_total";
    pub const RECHECKS: &str = "host_engine_runner_rechecks_total";
    /// Requirements handed to the effect runner, labelled by `type`
    pub const EFFECTS_DISPATCHED: &str = "host_engine_effects_dispatched_total";
    pub const EFFECT_TIMEOUTS: &str = "host_engine_effect_timeouts_total";
    pub const FULFILLMENTS_DROPPED: &str = "host_engine_fulfillments_dropped_total";
    pub const REQUIREMENTS_CLEARED: &str = "host_engine_requirements_cleared_total";
    pub const ERRORS_RECORDED: &str = "host_engine_errors_recorded_total";
    pub const FATAL_ESCALATIONS: &str = "host_engine_fatal_escalations_total";
}

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over `config.log_level` when set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::Observability(format!("invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| EngineError::Observability(format!("tracing already initialised: {}", e)))
}

/// Install the Prometheus recorder and describe the engine's metrics
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::Observability(format!("failed to install metrics recorder: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    use metric_names::*;

    metrics::describe_counter!(JOBS_PROCESSED, "Jobs processed by job type and outcome");
    metrics::describe_histogram!(
        JOB_DURATION,
        metrics::Unit::Seconds,
        "Wall time spent inside one job handler"
    );
    metrics::describe_counter!(DRAINS_STARTED, "Drain loops started");
    metrics::describe_counter!(RECHECKS, "Drains that found work after observing an empty mailbox");
    metrics::describe_counter!(EFFECTS_DISPATCHED, "Requirements dispatched to the effect runner");
    metrics::describe_counter!(EFFECT_TIMEOUTS, "Effect handler attempts that timed out");
    metrics::describe_counter!(FULFILLMENTS_DROPPED, "Stale fulfillments dropped");
    metrics::describe_counter!(REQUIREMENTS_CLEARED, "Requirements cleared from pendingRequirements");
    metrics::describe_counter!(ERRORS_RECORDED, "Error entries appended to system.errors");
    metrics::describe_counter!(FATAL_ESCALATIONS, "Keys halted by fatal escalation");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prometheus_safe() {
        use metric_names::*;
        for name in [
            JOBS_PROCESSED,
            JOB_DURATION,
            DRAINS_STARTED,
            RECHECKS,
            EFFECTS_DISPATCHED,
            EFFECT_TIMEOUTS,
            FULFILLMENTS_DROPPED,
            REQUIREMENTS_CLEARED,
            ERRORS_RECORDED,
            FATAL_ESCALATIONS,
        ] {
            assert!(name.starts_with("host_engine_"));
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
