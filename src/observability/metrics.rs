//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_backend_active_connections` (gauge): in-flight exchanges per backend
//! - `proxy_relayed_bytes_total` (counter): response bytes relayed per backend
//! - `proxy_client_disconnects_total` (counter): responses abandoned by the client
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_active_connections(backend: &str, active: usize) {
    gauge!("proxy_backend_active_connections", "backend" => backend.to_string()).set(active as f64);
}

pub fn record_relayed_bytes(backend: &str, bytes: u64) {
    counter!("proxy_relayed_bytes_total", "backend" => backend.to_string()).increment(bytes);
}

pub fn record_client_disconnect(backend: &str) {
    counter!("proxy_client_disconnects_total", "backend" => backend.to_string()).increment(1);
}
