//! Metrics collection and Prometheus export.
//!
//! Initializes the metrics exporter and provides the /metrics endpoint handler.

use crate::services::sweeper::SweepReport;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// Count a finished chat request by outcome (`ok` or an error kind).
pub fn record_chat_outcome(outcome: &'static str) {
    counter!("chat_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_upstream_call(provider: &str, success: bool, seconds: f64) {
    let labels = [
        ("provider", provider.to_string()),
        ("success", success.to_string()),
    ];
    histogram!("chat_upstream_duration_seconds", &labels).record(seconds);
}

pub fn record_tokens(tokens: u64) {
    counter!("chat_tokens_total").increment(tokens);
}

pub fn record_sweep(report: &SweepReport) {
    counter!("usage_counters_reset_total").increment(report.counters_reset as u64);
    counter!("sessions_evicted_total").increment(report.sessions_evicted as u64);
    counter!("usage_records_evicted_total").increment(report.usage_evicted as u64);
    counter!("rate_limit_keys_pruned_total").increment(report.limiter_keys_pruned as u64);
}
