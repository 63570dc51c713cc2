//! Prometheus metrics for application observability.
//!
//! This module provides Prometheus-compatible metrics for monitoring the application.
//! Metrics are exposed via a dedicated HTTP endpoint (default: port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `http_requests_total` - Requests served (labels: method, path, status)
//! - `http_rate_limited_total` - Requests rejected by the rate limiter
//! - `http_panics_recovered_total` - Handler panics converted to 500 responses
//! - `write_behind_submitted_total` - Recording tasks accepted
//! - `write_behind_failed_total` - Recording tasks the sink rejected
//! - `write_behind_dropped_total` - Recording tasks dropped (queue full or shutting down)
//!
//! ## Histograms
//! - `http_request_duration_seconds` - Request duration (labels: method, path)
//!
//! `path` is the route template the router matched, or `<unmatched>`, never
//! the raw request path.
//!
//! ## Gauges
//! - `rate_limiter_clients` - Client identities currently tracked by the rate limiter
//!
//! # Usage
//!
//! ```rust,ignore
//! use playground_server::metrics::{init_metrics, record_request};
//!
//! // Initialize metrics (call once at startup)
//! init_metrics(addr)?;
//!
//! // Record metrics from middleware
//! record_request("GET", "/api/v1/add", 200, 0.0021);
//! ```
//!
//! Recording functions are no-ops until a recorder is installed, so they are
//! safe to call from tests.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_RATE_LIMITED_TOTAL: &str = "http_rate_limited_total";
    pub const HTTP_PANICS_RECOVERED_TOTAL: &str = "http_panics_recovered_total";
    pub const WRITE_BEHIND_SUBMITTED_TOTAL: &str = "write_behind_submitted_total";
    pub const WRITE_BEHIND_FAILED_TOTAL: &str = "write_behind_failed_total";
    pub const WRITE_BEHIND_DROPPED_TOTAL: &str = "write_behind_dropped_total";
    pub const RATE_LIMITER_CLIENTS: &str = "rate_limiter_clients";
}

/// Initialize the Prometheus metrics exporter.
///
/// Installs the global recorder, starts the HTTP listener on `metrics_addr`
/// and registers metric descriptions.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. a recorder is
/// already installed or the address cannot be bound).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests served"
    );
    describe_counter!(
        names::HTTP_RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the per-client rate limiter"
    );
    describe_counter!(
        names::HTTP_PANICS_RECOVERED_TOTAL,
        "Total number of handler panics converted into 500 responses"
    );
    describe_counter!(
        names::WRITE_BEHIND_SUBMITTED_TOTAL,
        "Total number of recording tasks accepted by the write-behind recorder"
    );
    describe_counter!(
        names::WRITE_BEHIND_FAILED_TOTAL,
        "Total number of recording tasks rejected by the sink"
    );
    describe_counter!(
        names::WRITE_BEHIND_DROPPED_TOTAL,
        "Total number of recording tasks dropped before execution"
    );

    describe_histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMITER_CLIENTS,
        "Number of client identities tracked by the rate limiter"
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

// =============================================================================
// HTTP
// =============================================================================

/// Record one completed HTTP request.
pub fn record_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    counter!(names::HTTP_REQUESTS_TOTAL, "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, "method" => method.to_string(), "path" => path.to_string())
        .record(duration_secs);
}

/// Record a rate limit rejection.
pub fn record_rate_limited() {
    counter!(names::HTTP_RATE_LIMITED_TOTAL).increment(1);
}

/// Record a recovered handler panic.
pub fn record_panic_recovered() {
    counter!(names::HTTP_PANICS_RECOVERED_TOTAL).increment(1);
}

/// Update the tracked-clients gauge.
pub fn set_rate_limiter_clients(count: usize) {
    gauge!(names::RATE_LIMITER_CLIENTS).set(count as f64);
}

// =============================================================================
// Write-behind
// =============================================================================

pub fn record_write_behind_submitted() {
    counter!(names::WRITE_BEHIND_SUBMITTED_TOTAL).increment(1);
}

pub fn record_write_behind_failed() {
    counter!(names::WRITE_BEHIND_FAILED_TOTAL).increment(1);
}

/// Record a dropped recording task. `reason` is `queue_full` or `shutting_down`.
pub fn record_write_behind_dropped(reason: &'static str) {
    counter!(names::WRITE_BEHIND_DROPPED_TOTAL, "reason" => reason).increment(1);
}
