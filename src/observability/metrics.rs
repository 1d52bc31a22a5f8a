//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, rebuilds, attempts, events)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, upstream
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_phase_duration_seconds` (histogram): time spent per request phase
//! - `gateway_router_rebuilds_total` (counter): router rebuilds by result
//! - `gateway_balancer_attempts_total` (counter): balancer attempts by outcome
//! - `gateway_cache_invalidations_total` (counter): invalidations by scope
//! - `gateway_events_dropped_total` (counter): events lost, by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed every call is a no-op, so tests need no setup
//! - Labels are low-cardinality strings chosen by the caller

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_phase(phase: &'static str, elapsed: Duration) {
    histogram!("gateway_phase_duration_seconds", "phase" => phase).record(elapsed.as_secs_f64());
}

pub fn record_router_rebuild(result: &'static str) {
    counter!("gateway_router_rebuilds_total", "result" => result).increment(1);
}

pub fn record_balancer_attempt(outcome: &'static str) {
    counter!("gateway_balancer_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_invalidation(scope: &'static str) {
    counter!("gateway_cache_invalidations_total", "scope" => scope).increment(1);
}

pub fn record_event_dropped(reason: &'static str) {
    counter!("gateway_events_dropped_total", "reason" => reason).increment(1);
}
