//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define request metrics (RPS, latency, middleware failures, aborts)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `froovo_requests_total` (counter): requests by method, status
//! - `froovo_request_duration_seconds` (histogram): dispatch latency
//! - `froovo_middleware_errors_total` (counter): failed or panicked middlewares
//! - `froovo_aborted_requests_total` (counter): peer disconnected mid-chain
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels kept low-cardinality (no paths)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

/// Record one finished dispatch chain.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!(
        "froovo_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        "froovo_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_middleware_error() {
    counter!("froovo_middleware_errors_total").increment(1);
}

pub fn record_aborted(method: &str) {
    counter!("froovo_aborted_requests_total", "method" => method.to_string()).increment(1);
}
