//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tasks_submitted_total` (counter): jobs accepted by the task pool
//! - `tasks_dropped_total` (counter): jobs rejected, by reason
//! - `tasks_completed_total` (counter): jobs that ran to completion
//! - `tasks_faulted_total` (counter): jobs that panicked
//! - `rate_limited_total` (counter): requests rejected by the rate limiter
//! - `rate_limit_tracked_identities` (gauge): clients with a live bucket
//! - `auth_rejections_total` (counter): gateway rejections, by reason
//! - `session_revocations_total` (counter): epoch increments
//! - `http_requests_total` (counter): requests by method and status
//!
//! Without an installed recorder every call is a no-op, so tests never need
//! to set one up.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_task_submitted() {
    counter!("tasks_submitted_total").increment(1);
}

pub fn record_task_dropped(reason: &'static str) {
    counter!("tasks_dropped_total", "reason" => reason).increment(1);
}

pub fn record_task_completed() {
    counter!("tasks_completed_total").increment(1);
}

pub fn record_task_faulted() {
    counter!("tasks_faulted_total").increment(1);
}

pub fn record_rate_limited() {
    counter!("rate_limited_total").increment(1);
}

pub fn record_tracked_identities(count: usize) {
    gauge!("rate_limit_tracked_identities").set(count as f64);
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("auth_rejections_total", "reason" => reason).increment(1);
}

pub fn record_revocation() {
    counter!("session_revocations_total").increment(1);
}

pub fn record_request(method: &str, status: u16) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
