//! Prometheus metrics for the security pipeline.
//!
//! Counters are cheap atomic increments; nothing here is on a lock shared
//! between clients.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::utils::{SecurityError, SecurityResult};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(listen_address: SocketAddr) -> SecurityResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen_address)
        .install()
        .map_err(|e| SecurityError::Internal(format!("metrics exporter: {}", e)))?;

    tracing::info!(address = %listen_address, "Metrics exporter listening");
    Ok(())
}

/// Count one request entering the pipeline
pub fn record_request() {
    metrics::increment_counter!("shield_requests_total");
}

/// Count one short-circuited request, labelled by rejection reason
pub fn record_rejection(reason: &'static str) {
    metrics::increment_counter!("shield_requests_rejected_total", "reason" => reason);
}

/// Count one stage failure that was settled as "allow"
pub fn record_stage_failure(stage: &'static str) {
    metrics::increment_counter!("shield_stage_failures_total", "stage" => stage);
}

/// Count one auto-block installation or extension
pub fn record_auto_block() {
    metrics::increment_counter!("shield_auto_blocks_total");
}

/// Clients currently holding traffic counters
pub fn record_tracked_clients(count: usize) {
    metrics::gauge!("shield_tracked_clients", count as f64);
}

/// Entries currently stored in the blocklist
pub fn record_blocklist_size(count: usize) {
    metrics::gauge!("shield_blocklist_size", count as f64);
}
