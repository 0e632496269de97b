//! Lightweight metrics helpers for the gateway.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the
//! binary (or a test) may install any compatible recorder, and without one the
//! calls are no-ops.
//!
//! Provided metrics (labels vary by family):
//! * `gateway_requests_total` (counter)
//! * `gateway_request_duration_seconds` (histogram)
//! * `gateway_backend_requests_total` (counter)
//! * `gateway_backend_request_duration_seconds` (histogram)
//! * `gateway_upstream_retries_total` (counter per service)
//! * `gateway_circuit_state` (gauge per service: 0 closed, 1 open, 2 half-open)
//! * `gateway_rate_limited_total` (counter)
//! * `gateway_service_health_status` (gauge per service)
//! * `gateway_websocket_connections` (gauge)
//! * `gateway_websocket_messages_total` (counter by direction/type)
//!
//! The `*Timer` structs use `Drop` so durations are recorded on every exit path.
use std::time::Instant;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::OnceCell;

pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const GATEWAY_REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const GATEWAY_BACKEND_REQUESTS_TOTAL: &str = "gateway_backend_requests_total";
pub const GATEWAY_BACKEND_REQUEST_DURATION_SECONDS: &str =
    "gateway_backend_request_duration_seconds";
pub const GATEWAY_UPSTREAM_RETRIES_TOTAL: &str = "gateway_upstream_retries_total";
pub const GATEWAY_CIRCUIT_STATE: &str = "gateway_circuit_state";
pub const GATEWAY_RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
pub const GATEWAY_SERVICE_HEALTH_STATUS: &str = "gateway_service_health_status";
pub const GATEWAY_WEBSOCKET_CONNECTIONS: &str = "gateway_websocket_connections";
pub const GATEWAY_WEBSOCKET_MESSAGES_TOTAL: &str = "gateway_websocket_messages_total"; // labels: direction, type

static DESCRIBED: OnceCell<()> = OnceCell::new();

fn describe_metrics() {
    describe_counter!(
        GATEWAY_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        GATEWAY_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        GATEWAY_BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of calls forwarded to backend services (one per forward, not per attempt)."
    );
    describe_histogram!(
        GATEWAY_BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of forwarded calls including retries."
    );
    describe_counter!(
        GATEWAY_UPSTREAM_RETRIES_TOTAL,
        Unit::Count,
        "Retry attempts made against backend services."
    );
    describe_gauge!(
        GATEWAY_CIRCUIT_STATE,
        "Circuit breaker state per service (0 closed, 1 open, 2 half-open)"
    );
    describe_counter!(
        GATEWAY_RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the per-client rate limiter."
    );
    describe_gauge!(
        GATEWAY_SERVICE_HEALTH_STATUS,
        "Health status of individual services (1 healthy, 0 otherwise)"
    );
    describe_gauge!(
        GATEWAY_WEBSOCKET_CONNECTIONS,
        "Number of live WebSocket connections registered in the hub."
    );
    describe_counter!(
        GATEWAY_WEBSOCKET_MESSAGES_TOTAL,
        Unit::Count,
        "WebSocket envelopes handled (by direction/type)."
    );
}

pub fn set_service_health_status(service: &str, is_healthy: bool) {
    let health_value = if is_healthy { 1.0 } else { 0.0 };
    gauge!(GATEWAY_SERVICE_HEALTH_STATUS, "service" => service.to_string()).set(health_value);
}

/// Increment the total request counter for an inbound gateway request.
pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        GATEWAY_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(path: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        GATEWAY_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment total count of forwarded calls. `outcome` is a status code or an error kind.
pub fn increment_backend_request_total(service: &str, method: &str, outcome: &str) {
    counter!(
        GATEWAY_BACKEND_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_backend_request_duration(service: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        GATEWAY_BACKEND_REQUEST_DURATION_SECONDS,
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_upstream_retry(service: &str) {
    counter!(GATEWAY_UPSTREAM_RETRIES_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn set_circuit_state(service: &str, value: f64) {
    gauge!(GATEWAY_CIRCUIT_STATE, "service" => service.to_string()).set(value);
}

pub fn increment_rate_limited() {
    counter!(GATEWAY_RATE_LIMITED_TOTAL).increment(1);
}

pub fn set_websocket_connections(count: usize) {
    gauge!(GATEWAY_WEBSOCKET_CONNECTIONS).set(count as f64);
}

/// Record a WebSocket envelope (direction ingress/egress, envelope type).
pub fn increment_ws_message(direction: &str, kind: &str) {
    counter!(
        GATEWAY_WEBSOCKET_MESSAGES_TOTAL,
        "direction" => direction.to_string(),
        "type" => kind.to_string()
    )
    .increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}

/// RAII helper measuring a forwarded call, retries included.
pub struct BackendRequestTimer {
    start: Instant,
    service: String,
    method: String,
}

impl BackendRequestTimer {
    pub fn new(service: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            service: service.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for BackendRequestTimer {
    fn drop(&mut self) {
        record_backend_request_duration(&self.service, &self.method, self.start.elapsed());
    }
}

/// Register metric descriptions with the installed recorder (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing gateway metrics");
    DESCRIBED.get_or_init(describe_metrics);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        set_service_health_status("inventory", true);
        set_circuit_state("inventory", 1.0);
        increment_ws_message("ingress", "ping");
        drop(RequestTimer::new("/api/v1/player/1", "GET"));
        drop(BackendRequestTimer::new("player", "POST"));
    }

    #[test]
    fn init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(DESCRIBED.get().is_some());
    }
}
