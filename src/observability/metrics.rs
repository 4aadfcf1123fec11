//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_auth_requests_total` (counter): requests by strategy and outcome
//! - `gateway_start_hooks_total` (counter): start hook executions by outcome
//! - `gateway_cluster_requests_total` (counter): outbound cluster calls by status (0 = transport error)
//! - `gateway_auth_tokens` (gauge): tokens held by the local auth server

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_auth(strategy: &'static str, outcome: &'static str) {
    metrics::counter!("gateway_auth_requests_total", "strategy" => strategy, "outcome" => outcome)
        .increment(1);
}

pub fn record_start_hook(outcome: &'static str) {
    metrics::counter!("gateway_start_hooks_total", "outcome" => outcome).increment(1);
}

pub fn record_cluster_request(status: u16) {
    metrics::counter!("gateway_cluster_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_token_count(count: usize) {
    metrics::gauge!("gateway_auth_tokens").set(count as f64);
}
