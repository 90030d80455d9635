//! Prometheus metrics for the sweeper.
//!
//! Provides metrics for:
//! - Rows deleted per collection
//! - Cleanup passes by outcome and their duration
//! - Per-rule failures

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Outcome label of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran over every active rule (some rules may still have failed).
    Completed,
    /// No active rules, or another sweeper held the lock.
    Skipped,
    /// Orchestrator-level failure; the pass was aborted.
    Failed,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Completed => "completed",
            PassOutcome::Skipped => "skipped",
            PassOutcome::Failed => "failed",
        }
    }
}

/// Initialize the metrics recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }
    let Some(prometheus) = &config.prometheus else {
        return Err(MetricsError::Setup(
            "observability.metrics.prometheus is not configured".to_string(),
        ));
    };

    PrometheusBuilder::new()
        .with_http_listener(prometheus.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &prometheus.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()?;

    tracing::info!(listen = %prometheus.listen, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows deleted from one collection by a single rule run.
pub fn record_rows_deleted(collection: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ttl_rows_deleted_total",
            "collection" => collection.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (collection, count);
    }
}

/// Record the end of a cleanup pass.
pub fn record_pass(outcome: PassOutcome, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("ttl_passes_total", "outcome" => outcome.as_str()).increment(1);
        if outcome != PassOutcome::Skipped {
            histogram!("ttl_pass_duration_seconds").record(duration_secs);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Record a rule whose run failed.
pub fn record_rule_error(collection: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "ttl_rule_errors_total",
            "collection" => collection.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = collection;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
