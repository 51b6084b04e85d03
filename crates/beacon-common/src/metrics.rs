//! Metrics and observability for Beacon
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Instant;

use crate::error::{Error, Result};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Calling it again returns the first handle.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    PROMETHEUS
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| Error::Internal(format!("failed to install metrics recorder: {}", e)))
        })
        .cloned()
}

/// Export metrics in Prometheus text format
#[must_use]
pub fn export_prometheus() -> String {
    match PROMETHEUS.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

// ============================================================================
// Export Metrics
// ============================================================================

/// Record a finished export session
pub fn record_export_session(format: &str, complete: bool, rows: u64, bytes: u64) {
    counter!("beacon_export_sessions_total",
        "format" => format.to_string(),
        "complete" => complete.to_string()
    ).increment(1);
    counter!("beacon_export_rows_total", "format" => format.to_string()).increment(rows);
    counter!("beacon_export_bytes_total", "format" => format.to_string()).increment(bytes);
}

/// Record one store page fetch
pub fn record_store_page(signal: &str, rows: usize, latency_ms: f64) {
    histogram!("beacon_store_page_duration_ms", "signal" => signal.to_string()).record(latency_ms);
    histogram!("beacon_store_page_rows", "signal" => signal.to_string()).record(rows as f64);
}

/// Record an export producer failure
pub fn record_export_error(kind: &str) {
    counter!("beacon_export_errors_total", "kind" => kind.to_string()).increment(1);
}

// ============================================================================
// Routing Metrics
// ============================================================================

/// Record one routing evaluation
pub fn record_routing_match(channels: usize) {
    counter!("beacon_routing_matches_total").increment(1);
    histogram!("beacon_routing_channels").record(channels as f64);
}

/// Record a route skipped because its expression failed
pub fn record_expression_error(stage: &str) {
    counter!("beacon_routing_expression_errors_total", "stage" => stage.to_string()).increment(1);
}

/// Record expression cache hit/miss
pub fn record_expression_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("beacon_routing_cache_accesses_total", "result" => result.to_string()).increment(1);
}

/// Record a route store read failure
pub fn record_route_store_error() {
    counter!("beacon_routing_store_errors_total").increment(1);
}

// ============================================================================
// Supervisor Metrics
// ============================================================================

/// Record a config apply outcome
pub fn record_config_apply(status: &str, duration_ms: f64) {
    counter!("beacon_supervisor_applies_total", "status" => status.to_string()).increment(1);
    histogram!("beacon_supervisor_apply_duration_ms").record(duration_ms);
}

/// Record a session reconnect attempt
pub fn record_reconnect() {
    counter!("beacon_supervisor_reconnects_total").increment(1);
}

/// Update collector health gauge
pub fn set_collector_healthy(healthy: bool) {
    gauge!("beacon_supervisor_collector_healthy").set(if healthy { 1.0 } else { 0.0 });
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record an API request
pub fn record_http_request(route: &str, status: u16) {
    counter!("beacon_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    ).increment(1);
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_export_session("csv", true, 3, 42);
        record_routing_match(2);
        record_config_apply("applied", 1.5);
    }

    #[test]
    fn test_latency_timer() {
        let timer = LatencyTimer::new();
        assert!(timer.elapsed_ms() >= 0.0);
    }
}
