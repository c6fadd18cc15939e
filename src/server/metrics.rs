use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all relay metrics
const PREFIX: &str = "chat_relay";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Connection and room Metrics
    pub static ref WS_CONNECTIONS_ACTIVE: Gauge = Gauge::new(
        format!("{PREFIX}_ws_connections_active"),
        "Number of open WebSocket connections"
    ).expect("Failed to create ws_connections_active metric");

    pub static ref ROOMS_ACTIVE: Gauge = Gauge::new(
        format!("{PREFIX}_rooms_active"),
        "Number of rooms with at least one member"
    ).expect("Failed to create rooms_active metric");

    // Fanout Metrics
    pub static ref MESSAGES_PUBLISHED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_messages_published_total"),
        "Total chat messages published to a room"
    ).expect("Failed to create messages_published_total metric");

    pub static ref DECODE_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_decode_errors_total"),
        "Total inbound frames dropped because they failed to decode"
    ).expect("Failed to create decode_errors_total metric");

    pub static ref DELIVERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_deliveries_total"), "Per-recipient delivery attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create deliveries_total metric");

    pub static ref CONNECTIONS_EVICTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_connections_evicted_total"),
        "Connections removed from a room after being marked dead"
    ).expect("Failed to create connections_evicted_total metric");

    pub static ref FANOUT_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_fanout_duration_seconds"),
            "Time spent delivering one message to every room member"
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create fanout_duration_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(WS_CONNECTIONS_ACTIVE.clone()));
    let _ = REGISTRY.register(Box::new(ROOMS_ACTIVE.clone()));
    let _ = REGISTRY.register(Box::new(MESSAGES_PUBLISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DECODE_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DELIVERIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CONNECTIONS_EVICTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FANOUT_DURATION_SECONDS.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn set_connections_active(count: usize) {
    WS_CONNECTIONS_ACTIVE.set(count as f64);
}

pub fn set_rooms_active(count: usize) {
    ROOMS_ACTIVE.set(count as f64);
}

pub fn record_message_published() {
    MESSAGES_PUBLISHED_TOTAL.inc();
}

pub fn record_decode_error() {
    DECODE_ERRORS_TOTAL.inc();
}

/// Record one delivery attempt. `outcome` is "delivered" or a send error label.
pub fn record_delivery(outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_eviction() {
    CONNECTIONS_EVICTED_TOTAL.inc();
}

/// Record how long a whole fanout took
pub fn record_publish(duration: Duration) {
    FANOUT_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
