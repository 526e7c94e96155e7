//! Prometheus metrics for the request gate.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gate_requests_total` - Gated requests (labels: category, decision)
//! - `gate_rate_limited_total` - Requests rejected by the limiter (label: scope = ip | user)
//! - `gate_identity_failures_total` - Identity resolutions that failed (label: reason)
//!
//! ## Histograms
//! - `gate_decision_duration_seconds` - Time spent deciding, excluding the downstream handler
//!
//! ## Gauges
//! - `gate_rate_limit_entries` - Identifiers tracked by the limiter after the last sweep
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskboard_gate::metrics::{try_init_metrics, record_request};
//!
//! try_init_metrics(addr);
//! record_request("public", "allowed");
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gate_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "gate_rate_limited_total";
    pub const IDENTITY_FAILURES_TOTAL: &str = "gate_identity_failures_total";
    pub const DECISION_DURATION_SECONDS: &str = "gate_decision_duration_seconds";
    pub const RATE_LIMIT_ENTRIES: &str = "gate_rate_limit_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is
/// taken or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Total number of requests evaluated by the gate"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::IDENTITY_FAILURES_TOTAL,
        "Identity resolutions that timed out or errored"
    );
    describe_histogram!(
        names::DECISION_DURATION_SECONDS,
        "Time spent in the gate before forwarding or rejecting"
    );
    describe_gauge!(
        names::RATE_LIMIT_ENTRIES,
        "Identifiers tracked by the rate limiter after the last sweep"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_request(category: &'static str, decision: &'static str) {
    counter!(names::REQUESTS_TOTAL, "category" => category, "decision" => decision).increment(1);
}

/// `scope` is `ip` or `user`, matching the limiter key namespace.
pub fn record_rate_limited(scope: &'static str) {
    counter!(names::RATE_LIMITED_TOTAL, "scope" => scope).increment(1);
}

pub fn record_identity_failure(reason: &'static str) {
    counter!(names::IDENTITY_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_decision_duration(category: &'static str, duration_secs: f64) {
    histogram!(names::DECISION_DURATION_SECONDS, "category" => category).record(duration_secs);
}

pub fn set_rate_limit_entries(count: usize) {
    // Precision loss above 2^53 entries is irrelevant here
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64;
    gauge!(names::RATE_LIMIT_ENTRIES).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder is a no-op; these only check
    // that nothing panics.

    #[test]
    fn test_record_request() {
        record_request("public", "allowed");
        record_request("protected_admin", "unauthorized");
    }

    #[test]
    fn test_record_failures() {
        record_rate_limited("ip");
        record_identity_failure("timeout");
    }

    #[test]
    fn test_record_duration_and_gauge() {
        record_decision_duration("webhook", 0.0004);
        set_rate_limit_entries(12);
    }
}
