//! Metrics collection and exposition.
//!
//! # Metrics
//! - `netlayer_ops_total` (counter): completed ops by op name, outcome
//! - `netlayer_op_duration_seconds` (histogram): op latency
//! - `netlayer_open_resources` (gauge): live resource table entries
//! - `netlayer_resolver_cache_total` (counter): cache hits and misses
//! - `netlayer_resolver_queries_total` (counter): outbound lookups by backend
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_op(op: &'static str, outcome: &'static str, started: Instant) {
    ::metrics::counter!("netlayer_ops_total", "op" => op, "outcome" => outcome).increment(1);
    ::metrics::histogram!("netlayer_op_duration_seconds", "op" => op)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_open_resources(count: usize) {
    ::metrics::gauge!("netlayer_open_resources").set(count as f64);
}

pub fn record_resolver_cache(result: &'static str) {
    ::metrics::counter!("netlayer_resolver_cache_total", "result" => result).increment(1);
}

pub fn record_resolver_query(backend: &'static str) {
    ::metrics::counter!("netlayer_resolver_queries_total", "backend" => backend).increment(1);
}
