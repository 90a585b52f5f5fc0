use crate::adaptive::MetricsSnapshot;
use crate::error::{GateError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GateError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        // Request metrics
        describe_counter!(
            "fluxgate_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "fluxgate_request_duration_seconds",
            "HTTP request latencies in seconds"
        );
        describe_counter!(
            "fluxgate_requests_errors_total",
            "Total number of requests recorded as error events"
        );

        // Limiter metrics
        describe_counter!(
            "fluxgate_rate_limit_rejections_total",
            "Requests rejected, labelled by the limiter that rejected them"
        );
        describe_counter!(
            "fluxgate_counter_store_errors_total",
            "Counter store failures resolved by the failure policy"
        );

        // Adaptive control
        describe_gauge!("fluxgate_adaptive_rate", "Current adaptive refill rate (tokens/sec)");
        describe_gauge!("fluxgate_adaptive_capacity", "Current adaptive bucket capacity");
        describe_gauge!("fluxgate_cpu_usage_percent", "Last sampled host CPU utilization");
        describe_gauge!("fluxgate_latency_p95_ms", "Rolling p95 request latency in milliseconds");
        describe_gauge!("fluxgate_error_rate", "One-minute error events per second");
        describe_gauge!("fluxgate_request_rate", "One-minute requests per second");

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record a gated request
pub fn record_request(method: &str, status: u16, duration: f64, is_error: bool) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];

    counter!("fluxgate_requests_total", &labels).increment(1);
    histogram!("fluxgate_request_duration_seconds", &labels).record(duration);

    if is_error {
        counter!("fluxgate_requests_errors_total", &labels).increment(1);
    }
}

/// Record a rejection by `limiter` ("shared" or "adaptive")
pub fn record_rate_limit_rejection(limiter: &'static str) {
    counter!("fluxgate_rate_limit_rejections_total", "limiter" => limiter).increment(1);
}

/// Record a counter store failure
pub fn record_counter_store_error() {
    counter!("fluxgate_counter_store_errors_total").increment(1);
}

/// Record the limits applied by the control loop
pub fn record_adaptive_limits(rate: f64, capacity: f64) {
    gauge!("fluxgate_adaptive_rate").set(rate);
    gauge!("fluxgate_adaptive_capacity").set(capacity);
}

/// Record the signals sampled by the control loop
pub fn record_adaptive_snapshot(snapshot: &MetricsSnapshot) {
    gauge!("fluxgate_cpu_usage_percent").set(snapshot.cpu_usage_percent);
    gauge!("fluxgate_latency_p95_ms").set(snapshot.latency_p95_ms);
    gauge!("fluxgate_error_rate").set(snapshot.error_rate);
    gauge!("fluxgate_request_rate").set(snapshot.request_rate);
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    method: String,
}

impl Timer {
    /// Start a new timer for a request
    pub fn new(method: String) -> Self {
        Self {
            start: Instant::now(),
            method,
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(&self, status: u16, is_error: bool) {
        record_request(&self.method, status, self.elapsed().as_secs_f64(), is_error);
    }

    /// Time since the request arrived
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
