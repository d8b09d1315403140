//! Prometheus metrics for request coordination.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are safe to call before (or without) initialization;
//! the `metrics` facade drops samples when no recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `mailer_rate_limit_decisions_total` - Limiter decisions (label: decision = allowed|denied)
//! - `mailer_idempotency_outcomes_total` - Coordinator outcomes (label: outcome =
//!   executed|replayed|in_flight|conflict)
//! - `mailer_emails_dispatched_total` - Emails accepted for delivery
//! - `mailer_store_errors_total` - Store failures seen at the HTTP boundary (label: operation)
//!
//! ## Histograms
//! - `mailer_store_probe_duration_seconds` - Latency of the background store probe
//!
//! ## Gauges
//! - `mailer_store_up` - Store reachability (1 = reachable, 0 = unreachable)
//!
//! # Usage
//!
//! ```rust,ignore
//! use mailer_guard::metrics::{try_init_metrics, record_rate_limit_decision};
//!
//! try_init_metrics("0.0.0.0:9090".parse()?);
//! record_rate_limit_decision(true);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "mailer_rate_limit_decisions_total";
    pub const IDEMPOTENCY_OUTCOMES_TOTAL: &str = "mailer_idempotency_outcomes_total";
    pub const EMAILS_DISPATCHED_TOTAL: &str = "mailer_emails_dispatched_total";
    pub const STORE_ERRORS_TOTAL: &str = "mailer_store_errors_total";
    pub const STORE_PROBE_DURATION_SECONDS: &str = "mailer_store_probe_duration_seconds";
    pub const STORE_UP: &str = "mailer_store_up";
}

/// Install the Prometheus exporter and describe every metric.
///
/// # Errors
///
/// Returns a message if the exporter cannot bind or a recorder is already
/// installed.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limiter decisions by outcome"
    );
    describe_counter!(
        names::IDEMPOTENCY_OUTCOMES_TOTAL,
        "Idempotency coordinator outcomes"
    );
    describe_counter!(
        names::EMAILS_DISPATCHED_TOTAL,
        "Emails accepted for delivery"
    );
    describe_counter!(
        names::STORE_ERRORS_TOTAL,
        "Coordination store failures by operation"
    );

    describe_histogram!(
        names::STORE_PROBE_DURATION_SECONDS,
        "Background store probe round-trip in seconds"
    );

    describe_gauge!(
        names::STORE_UP,
        "Coordination store reachability (1 = reachable, 0 = unreachable)"
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
// Counter Recording Functions
// =============================================================================

/// Record one limiter decision.
pub fn record_rate_limit_decision(allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

/// Record an idempotency outcome (`executed`, `replayed`, `in_flight`, `conflict`).
pub fn record_idempotency_outcome(outcome: &'static str) {
    counter!(names::IDEMPOTENCY_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_email_dispatched() {
    counter!(names::EMAILS_DISPATCHED_TOTAL).increment(1);
}

/// Record a store failure surfaced to a caller.
pub fn record_store_error(operation: &'static str) {
    counter!(names::STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

pub fn record_store_probe_duration(duration_secs: f64) {
    histogram!(names::STORE_PROBE_DURATION_SECONDS).record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the store reachability gauge.
pub fn set_store_up(up: bool) {
    gauge!(names::STORE_UP).set(if up { 1.0 } else { 0.0 });
}
