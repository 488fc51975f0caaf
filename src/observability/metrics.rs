//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, handled_by
//! - `gateway_request_duration_seconds` (histogram): latency by handled_by
//! - `gateway_upstream_clients` (gauge): pooled outbound clients
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality: no paths, no upstream urls

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter"),
    }
}

/// Record one finished request.
pub fn record_request(method: &str, status: u16, handled_by: &'static str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "handled_by" => handled_by
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "handled_by" => handled_by)
        .record(start.elapsed().as_secs_f64());
}

/// Current number of pooled upstream clients.
pub fn record_upstream_clients(count: usize) {
    gauge!("gateway_upstream_clients").set(count as f64);
}
