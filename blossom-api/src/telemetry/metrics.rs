//! Prometheus Metrics Definitions
//!
//! Process-wide counters for the consistency layer. Rendered in the text
//! exposition format by [`gather_text`] for whichever HTTP layer serves it.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

use crate::error::{ApiError, ApiResult};

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<BlossomMetrics>> = Lazy::new(BlossomMetrics::new);

/// Container for all Blossom metrics.
#[derive(Clone)]
pub struct BlossomMetrics {
    /// Cache lookups - labels: kind (detail/list), outcome (hit/miss/error)
    pub cache_requests_total: CounterVec,

    /// Failed fire-and-forget tasks - labels: task
    pub background_task_failures_total: CounterVec,

    /// Change events handled - labels: table, outcome
    pub change_events_total: CounterVec,

    /// Ranking refresh cycles - labels: outcome
    pub ranking_refreshes_total: CounterVec,
}

impl BlossomMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            cache_requests_total: register_counter_vec!(
                "blossom_cache_requests_total",
                "Topic cache lookups by kind and outcome",
                &["kind", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_requests_total: {}", e)))?,

            background_task_failures_total: register_counter_vec!(
                "blossom_background_task_failures_total",
                "Background tasks that finished with an error",
                &["task"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register background_task_failures_total: {}", e)))?,

            change_events_total: register_counter_vec!(
                "blossom_change_events_total",
                "Change events consumed by the index synchronizer",
                &["table", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register change_events_total: {}", e)))?,

            ranking_refreshes_total: register_counter_vec!(
                "blossom_ranking_refreshes_total",
                "Hot ranking refresh cycles",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register ranking_refreshes_total: {}", e)))?,
        })
    }

    /// Record a cache lookup.
    pub fn record_cache_lookup(&self, kind: &str, outcome: &str) {
        self.cache_requests_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Record a failed background task.
    pub fn record_background_failure(&self, task: &str) {
        self.background_task_failures_total
            .with_label_values(&[task])
            .inc();
    }

    /// Record a handled change event.
    pub fn record_change_event(&self, table: &str, outcome: &str) {
        self.change_events_total
            .with_label_values(&[table, outcome])
            .inc();
    }

    /// Record a ranking refresh cycle.
    pub fn record_ranking_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.ranking_refreshes_total
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Run `f` against the global metrics, skipping silently when registration
/// failed at startup.
pub fn with_metrics(f: impl FnOnce(&BlossomMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Render every registered metric in Prometheus text format.
pub fn gather_text() -> ApiResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ApiError::internal_error(format!("Metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.cache_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_recorded_counters_are_exposed() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_cache_lookup("detail", "hit");
        metrics.record_background_failure("test_task");
        metrics.record_change_event("topics", "indexed");
        metrics.record_ranking_refresh(true);

        let text = gather_text().map_err(|e| e.message)?;
        assert!(text.contains("blossom_cache_requests_total"));
        assert!(text.contains("task=\"test_task\""));
        assert!(text.contains("blossom_ranking_refreshes_total"));
        Ok(())
    }
}
