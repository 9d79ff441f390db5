//! Metrics definitions for the coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `coordinator_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: 7 values max
//! - `endpoint`: the fixed route table plus `/other`
//! - `outcome`, `kind`, `reason`: bounded by code
//! - `event`: the seven game event names

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("coordinator_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Session lengths are whole multiples of the session unit
        .set_buckets_for_metric(
            Matcher::Full("coordinator_session_granted_seconds".to_string()),
            &[30.0, 60.0, 90.0, 120.0, 180.0, 300.0, 600.0],
        )
        .map_err(|e| format!("Failed to set session buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `coordinator_http_requests_total`, `coordinator_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// For `/realtime` the duration covers stream setup only; the body streams
/// after the response is returned.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("coordinator_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("coordinator_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto the fixed route table.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/join" => "/join",
        "/leave" => "/leave",
        "/send-event" => "/send-event",
        "/realtime" => "/realtime",
        "/ledger/credits" => "/ledger/credits",
        _ => "/other",
    }
}

// ============================================================================
// Queue Metrics
// ============================================================================

/// Record a join attempt.
///
/// Metric: `coordinator_joins_total`
/// Labels: `outcome` (accepted, existing, no_credits, ledger_error, invalid)
pub fn record_join(outcome: &'static str) {
    counter!("coordinator_joins_total", "outcome" => outcome).increment(1);
}

/// Record a leave.
///
/// Metric: `coordinator_leaves_total`
/// Labels: `kind` (active, queued, absent)
pub fn record_leave(kind: &'static str) {
    counter!("coordinator_leaves_total", "kind" => kind).increment(1);
}

/// Record a promotion to the active slot and the control time it bought.
///
/// Metric: `coordinator_promotions_total`, `coordinator_session_granted_seconds`
pub fn record_promotion(total_seconds: u32) {
    counter!("coordinator_promotions_total").increment(1);
    histogram!("coordinator_session_granted_seconds").record(f64::from(total_seconds));
}

/// Metric: `coordinator_session_expiries_total`
pub fn record_expiry() {
    counter!("coordinator_session_expiries_total").increment(1);
}

/// Metric: `coordinator_evictions_total`
pub fn record_eviction() {
    counter!("coordinator_evictions_total").increment(1);
}

/// Record a committed snapshot broadcast and the resulting queue length.
///
/// Metric: `coordinator_snapshots_broadcast_total` (labels: `reason`),
/// `coordinator_queue_length` (gauge)
pub fn record_snapshot(reason: &'static str, queue_length: usize) {
    counter!("coordinator_snapshots_broadcast_total", "reason" => reason).increment(1);
    gauge!("coordinator_queue_length").set(queue_length as f64);
}

/// Metric: `coordinator_ledger_errors_total`
/// Labels: `operation`
pub fn record_ledger_error(operation: &'static str) {
    counter!("coordinator_ledger_errors_total", "operation" => operation).increment(1);
}

// ============================================================================
// Realtime Metrics
// ============================================================================

/// Record a game event publish request.
///
/// Metric: `coordinator_commands_total`
/// Labels: `event`, `outcome` (accepted, not_active, reserved)
pub fn record_command(event: &'static str, outcome: &'static str) {
    counter!("coordinator_commands_total",
        "event" => event,
        "outcome" => outcome
    )
    .increment(1);
}

/// Metric: `coordinator_realtime_subscribers` (gauge)
pub fn set_realtime_subscribers(count: usize) {
    gauge!("coordinator_realtime_subscribers").set(count as f64);
}

/// Metric: `coordinator_realtime_lagged_total`
pub fn record_subscriber_lagged() {
    counter!("coordinator_realtime_lagged_total").increment(1);
}
