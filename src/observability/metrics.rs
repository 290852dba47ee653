//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the service metrics (outbound calls, breakers, retries, health, inbound HTTP, datastores)
//! - Record them through a pluggable [`MetricsSink`]
//! - Expose a Prometheus-compatible text rendering for the `/metrics` endpoint
//!
//! # Metrics
//! - `service_calls_total` (counter): outbound calls by dependency, method, status
//! - `service_call_duration_seconds` (histogram): outbound call latency
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `retry_attempts_total` (counter): retries by dependency, method
//! - `health_check_status` (gauge): 0=unhealthy, 1=degraded, 2=healthy
//! - `http_requests_total` (counter): inbound requests by method, route, status code
//! - `http_requests_in_flight` (gauge): inbound requests currently being served
//!
//! # Design Decisions
//! - No global recorder: the composition root builds one and hands clones around
//! - Recording never fails the caller; sink errors are logged at trace level and dropped
//! - Histogram buckets tuned for typical web latencies

use std::sync::Arc;
use std::time::Duration;

use metrics::{Key, KeyName, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use thiserror::Error;

use crate::health::HealthStatus;
use crate::resilience::circuit_breaker::CircuitState;

pub const SERVICE_CALLS_TOTAL: &str = "service_calls_total";
pub const SERVICE_CALL_DURATION: &str = "service_call_duration_seconds";
pub const SERVICE_CALL_ERRORS_TOTAL: &str = "service_call_errors_total";
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";
pub const CIRCUIT_BREAKER_FAILURES_TOTAL: &str = "circuit_breaker_failures_total";
pub const CIRCUIT_BREAKER_TRANSITIONS_TOTAL: &str = "circuit_breaker_transitions_total";
pub const RETRY_ATTEMPTS_TOTAL: &str = "retry_attempts_total";
pub const RETRY_FAILURES_TOTAL: &str = "retry_failures_total";
pub const HEALTH_CHECK_STATUS: &str = "health_check_status";
pub const HEALTH_CHECK_DURATION: &str = "health_check_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";
pub const DATABASE_CONNECTIONS: &str = "database_connections";
pub const DATABASE_QUERY_DURATION: &str = "database_query_duration_seconds";
pub const DATABASE_ERRORS_TOTAL: &str = "database_errors_total";
pub const CACHE_CONNECTIONS: &str = "cache_connections";
pub const CACHE_OPERATIONS_TOTAL: &str = "cache_operations_total";
pub const CACHE_OPERATION_DURATION: &str = "cache_operation_duration_seconds";

/// Latency buckets in seconds.
const LATENCY_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

const DESCRIPTIONS: [(MetricKind, &str, &str); 19] = [
    (MetricKind::Counter, SERVICE_CALLS_TOTAL, "Total number of external service calls"),
    (MetricKind::Histogram, SERVICE_CALL_DURATION, "Duration of external service calls in seconds"),
    (MetricKind::Counter, SERVICE_CALL_ERRORS_TOTAL, "Total number of external service call errors"),
    (MetricKind::Gauge, CIRCUIT_BREAKER_STATE, "Current state of circuit breakers (0=closed, 1=half-open, 2=open)"),
    (MetricKind::Counter, CIRCUIT_BREAKER_FAILURES_TOTAL, "Total number of failures recorded by circuit breakers"),
    (MetricKind::Counter, CIRCUIT_BREAKER_TRANSITIONS_TOTAL, "Total number of circuit breaker state transitions"),
    (MetricKind::Counter, RETRY_ATTEMPTS_TOTAL, "Total number of retry attempts"),
    (MetricKind::Counter, RETRY_FAILURES_TOTAL, "Total number of operations that failed after all attempts"),
    (MetricKind::Gauge, HEALTH_CHECK_STATUS, "Health check status (0=unhealthy, 1=degraded, 2=healthy)"),
    (MetricKind::Histogram, HEALTH_CHECK_DURATION, "Duration of health checks in seconds"),
    (MetricKind::Counter, HTTP_REQUESTS_TOTAL, "Total number of inbound HTTP requests"),
    (MetricKind::Histogram, HTTP_REQUEST_DURATION, "Duration of inbound HTTP requests in seconds"),
    (MetricKind::Gauge, HTTP_REQUESTS_IN_FLIGHT, "Current number of inbound HTTP requests being processed"),
    (MetricKind::Gauge, DATABASE_CONNECTIONS, "Current number of database connections"),
    (MetricKind::Histogram, DATABASE_QUERY_DURATION, "Duration of database queries in seconds"),
    (MetricKind::Counter, DATABASE_ERRORS_TOTAL, "Total number of database errors"),
    (MetricKind::Gauge, CACHE_CONNECTIONS, "Current number of cache connections"),
    (MetricKind::Counter, CACHE_OPERATIONS_TOTAL, "Total number of cache operations"),
    (MetricKind::Histogram, CACHE_OPERATION_DURATION, "Duration of cache operations in seconds"),
];

#[derive(Debug, Clone, Copy)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Label set attached to a single sample.
pub type Labels = Vec<(&'static str, String)>;

/// Errors a sink may report. The recorder swallows all of them.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metric name: {0}")]
    InvalidName(String),

    #[error("invalid label name '{label}' on metric {metric}")]
    InvalidLabel { metric: String, label: String },

    #[error("failed to build metrics exporter: {0}")]
    Build(String),
}

/// Backend that receives metric samples.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: Labels, value: u64) -> Result<(), MetricsError>;
    fn set_gauge(&self, name: &'static str, labels: Labels, value: f64) -> Result<(), MetricsError>;
    fn adjust_gauge(&self, name: &'static str, labels: Labels, delta: f64) -> Result<(), MetricsError>;
    fn record_histogram(&self, name: &'static str, labels: Labels, value: f64) -> Result<(), MetricsError>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment_counter(&self, _: &'static str, _: Labels, _: u64) -> Result<(), MetricsError> {
        Ok(())
    }

    fn set_gauge(&self, _: &'static str, _: Labels, _: f64) -> Result<(), MetricsError> {
        Ok(())
    }

    fn adjust_gauge(&self, _: &'static str, _: Labels, _: f64) -> Result<(), MetricsError> {
        Ok(())
    }

    fn record_histogram(&self, _: &'static str, _: Labels, _: f64) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// Sink backed by a locally owned Prometheus recorder.
///
/// The recorder is never installed as the process-global `metrics` recorder,
/// so several sinks can coexist (one per test, for instance).
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(&LATENCY_BUCKETS)
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        for (kind, name, help) in DESCRIPTIONS {
            let key = KeyName::from_const_str(name);
            match kind {
                MetricKind::Counter => recorder.describe_counter(key, None, help.into()),
                MetricKind::Gauge => recorder.describe_gauge(key, None, help.into()),
                MetricKind::Histogram => recorder.describe_histogram(key, None, help.into()),
            }
        }

        Ok(Self { recorder, handle })
    }

    /// Handle used to render the text exposition format.
    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    fn key(name: &'static str, labels: Labels) -> Result<Key, MetricsError> {
        if !is_valid_name(name) {
            return Err(MetricsError::InvalidName(name.to_string()));
        }
        let mut parts = Vec::with_capacity(labels.len());
        for (label, value) in labels {
            if !is_valid_name(label) || label.contains(':') {
                return Err(MetricsError::InvalidLabel {
                    metric: name.to_string(),
                    label: label.to_string(),
                });
            }
            parts.push(Label::new(label, value));
        }
        Ok(Key::from_parts(name, parts))
    }
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(&self, name: &'static str, labels: Labels, value: u64) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        self.recorder.register_counter(&key, &METADATA).increment(value);
        Ok(())
    }

    fn set_gauge(&self, name: &'static str, labels: Labels, value: f64) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        self.recorder.register_gauge(&key, &METADATA).set(value);
        Ok(())
    }

    fn adjust_gauge(&self, name: &'static str, labels: Labels, delta: f64) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        let gauge = self.recorder.register_gauge(&key, &METADATA);
        if delta >= 0.0 {
            gauge.increment(delta);
        } else {
            gauge.decrement(-delta);
        }
        Ok(())
    }

    fn record_histogram(&self, name: &'static str, labels: Labels, value: f64) -> Result<(), MetricsError> {
        let key = Self::key(name, labels)?;
        self.recorder.register_histogram(&key, &METADATA).record(value);
        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Fire-and-forget metrics façade shared by every component.
///
/// Cheap to clone. Every method swallows sink errors.
#[derive(Clone)]
pub struct MetricsRecorder {
    service: Arc<str>,
    sink: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    pub fn new(service: impl Into<String>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            service: Arc::from(service.into()),
            sink,
        }
    }

    /// A recorder that drops every sample.
    pub fn noop(service: impl Into<String>) -> Self {
        Self::new(service, Arc::new(NoopSink))
    }

    /// A recorder backed by a fresh Prometheus sink, plus the handle that renders it.
    pub fn prometheus(service: impl Into<String>) -> Result<(Self, PrometheusHandle), MetricsError> {
        let sink = PrometheusSink::new()?;
        let handle = sink.handle();
        Ok((Self::new(service, Arc::new(sink)), handle))
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn counter(&self, name: &'static str, labels: Labels) {
        if let Err(e) = self.sink.increment_counter(name, labels, 1) {
            tracing::trace!(metric = name, error = %e, "Dropped counter sample");
        }
    }

    fn gauge(&self, name: &'static str, labels: Labels, value: f64) {
        if let Err(e) = self.sink.set_gauge(name, labels, value) {
            tracing::trace!(metric = name, error = %e, "Dropped gauge sample");
        }
    }

    fn gauge_delta(&self, name: &'static str, labels: Labels, delta: f64) {
        if let Err(e) = self.sink.adjust_gauge(name, labels, delta) {
            tracing::trace!(metric = name, error = %e, "Dropped gauge adjustment");
        }
    }

    fn histogram(&self, name: &'static str, labels: Labels, value: f64) {
        if let Err(e) = self.sink.record_histogram(name, labels, value) {
            tracing::trace!(metric = name, error = %e, "Dropped histogram sample");
        }
    }

    // --- Outbound calls ---

    /// Record one outbound call. Any status other than `"success"` also counts as an error.
    pub fn record_service_call(&self, dependency: &str, method: &str, status: &str, duration: Duration) {
        let labels = || {
            vec![
                ("dependency", dependency.to_string()),
                ("method", method.to_string()),
                ("status", status.to_string()),
            ]
        };
        self.histogram(SERVICE_CALL_DURATION, labels(), duration.as_secs_f64());
        self.counter(SERVICE_CALLS_TOTAL, labels());
        if status != "success" {
            self.counter(
                SERVICE_CALL_ERRORS_TOTAL,
                vec![
                    ("dependency", dependency.to_string()),
                    ("method", method.to_string()),
                    ("error_type", status.to_string()),
                ],
            );
        }
    }

    // --- Circuit breakers ---

    pub fn record_circuit_state(&self, dependency: &str, state: CircuitState) {
        self.gauge(
            CIRCUIT_BREAKER_STATE,
            vec![("dependency", dependency.to_string())],
            state.as_gauge(),
        );
    }

    pub fn record_circuit_failure(&self, dependency: &str) {
        self.counter(CIRCUIT_BREAKER_FAILURES_TOTAL, vec![("dependency", dependency.to_string())]);
    }

    pub fn record_circuit_transition(&self, dependency: &str, from: CircuitState, to: CircuitState) {
        self.counter(
            CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
            vec![
                ("dependency", dependency.to_string()),
                ("from_state", from.as_str().to_string()),
                ("to_state", to.as_str().to_string()),
            ],
        );
        self.record_circuit_state(dependency, to);
    }

    // --- Retries ---

    pub fn record_retry_attempt(&self, dependency: &str, method: &str) {
        self.counter(
            RETRY_ATTEMPTS_TOTAL,
            vec![("dependency", dependency.to_string()), ("method", method.to_string())],
        );
    }

    pub fn record_retry_failure(&self, dependency: &str, method: &str) {
        self.counter(
            RETRY_FAILURES_TOTAL,
            vec![("dependency", dependency.to_string()), ("method", method.to_string())],
        );
    }

    // --- Health checks ---

    pub fn record_health_check(&self, dependency: &str, status: HealthStatus, duration: Duration) {
        let labels = || vec![("service", self.service.to_string()), ("dependency", dependency.to_string())];
        self.gauge(HEALTH_CHECK_STATUS, labels(), status.as_gauge());
        self.histogram(HEALTH_CHECK_DURATION, labels(), duration.as_secs_f64());
    }

    // --- Inbound HTTP ---

    pub fn record_http_request(&self, method: &str, route: &str, status_code: u16, duration: Duration) {
        self.counter(
            HTTP_REQUESTS_TOTAL,
            vec![
                ("method", method.to_string()),
                ("route", route.to_string()),
                ("status_code", status_code.to_string()),
            ],
        );
        self.histogram(
            HTTP_REQUEST_DURATION,
            vec![("method", method.to_string()), ("route", route.to_string())],
            duration.as_secs_f64(),
        );
    }

    pub fn http_request_started(&self, method: &str, route: &str) {
        self.gauge_delta(
            HTTP_REQUESTS_IN_FLIGHT,
            vec![("method", method.to_string()), ("route", route.to_string())],
            1.0,
        );
    }

    pub fn http_request_finished(&self, method: &str, route: &str) {
        self.gauge_delta(
            HTTP_REQUESTS_IN_FLIGHT,
            vec![("method", method.to_string()), ("route", route.to_string())],
            -1.0,
        );
    }

    // --- Datastores ---

    pub fn record_database_connections(&self, database: &str, count: usize) {
        self.gauge(
            DATABASE_CONNECTIONS,
            vec![("service", self.service.to_string()), ("database", database.to_string())],
            count as f64,
        );
    }

    pub fn record_database_query(&self, database: &str, query_type: &str, duration: Duration) {
        self.histogram(
            DATABASE_QUERY_DURATION,
            vec![
                ("service", self.service.to_string()),
                ("database", database.to_string()),
                ("query_type", query_type.to_string()),
            ],
            duration.as_secs_f64(),
        );
    }

    pub fn record_database_error(&self, database: &str, error_type: &str) {
        self.counter(
            DATABASE_ERRORS_TOTAL,
            vec![
                ("service", self.service.to_string()),
                ("database", database.to_string()),
                ("error_type", error_type.to_string()),
            ],
        );
    }

    pub fn record_cache_connections(&self, count: usize) {
        self.gauge(CACHE_CONNECTIONS, vec![("service", self.service.to_string())], count as f64);
    }

    pub fn record_cache_operation(&self, operation: &str, status: &str, duration: Duration) {
        self.counter(
            CACHE_OPERATIONS_TOTAL,
            vec![
                ("service", self.service.to_string()),
                ("operation", operation.to_string()),
                ("status", status.to_string()),
            ],
        );
        self.histogram(
            CACHE_OPERATION_DURATION,
            vec![("service", self.service.to_string()), ("operation", operation.to_string())],
            duration.as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    impl MetricsSink for FailingSink {
        fn increment_counter(&self, name: &'static str, _: Labels, _: u64) -> Result<(), MetricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError::InvalidName(name.to_string()))
        }

        fn set_gauge(&self, name: &'static str, _: Labels, _: f64) -> Result<(), MetricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError::InvalidName(name.to_string()))
        }

        fn adjust_gauge(&self, name: &'static str, _: Labels, _: f64) -> Result<(), MetricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError::InvalidName(name.to_string()))
        }

        fn record_histogram(&self, name: &'static str, _: Labels, _: f64) -> Result<(), MetricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError::InvalidName(name.to_string()))
        }
    }

    /// Value of the first exposition line starting with `prefix`.
    fn sample(output: &str, prefix: &str) -> Option<String> {
        output
            .lines()
            .find(|line| line.starts_with(prefix))
            .and_then(|line| line.rsplit(' ').next())
            .map(str::to_string)
    }

    #[test]
    fn test_sink_errors_are_swallowed() {
        let sink = Arc::new(FailingSink { calls: AtomicUsize::new(0) });
        let recorder = MetricsRecorder::new("svc", sink.clone());

        recorder.record_service_call("billing", "GET", "error", Duration::from_millis(5));
        recorder.record_circuit_failure("billing");
        recorder.http_request_started("GET", "/health");

        // histogram + total + errors, one failure counter, one gauge adjustment
        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_prometheus_rendering() {
        let (recorder, handle) = MetricsRecorder::prometheus("orders").unwrap();

        recorder.record_service_call("billing", "POST", "success", Duration::from_millis(20));
        recorder.record_circuit_transition("billing", CircuitState::Closed, CircuitState::Open);
        recorder.record_retry_attempt("billing", "POST");
        recorder.record_health_check("postgres", HealthStatus::Degraded, Duration::from_millis(3));
        recorder.record_database_error("postgres", "timeout");

        let output = handle.render();
        assert!(output.contains("service_calls_total"));
        assert!(output.contains("dependency=\"billing\""));
        assert_eq!(sample(&output, "circuit_breaker_state{").as_deref(), Some("2"));
        assert!(output.contains("from_state=\"CLOSED\""));
        assert!(output.contains("retry_attempts_total"));
        assert!(output.contains("health_check_status"));
        assert!(output.contains("database_errors_total"));
        // successful calls do not count as errors
        assert!(!output.contains("service_call_errors_total{"));
    }

    #[test]
    fn test_in_flight_gauge_returns_to_zero() {
        let (recorder, handle) = MetricsRecorder::prometheus("orders").unwrap();

        recorder.http_request_started("GET", "/health");
        recorder.http_request_started("GET", "/health");
        recorder.http_request_finished("GET", "/health");
        assert_eq!(sample(&handle.render(), "http_requests_in_flight{").as_deref(), Some("1"));

        recorder.http_request_finished("GET", "/health");
        assert_eq!(sample(&handle.render(), "http_requests_in_flight{").as_deref(), Some("0"));
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("http_requests_total"));
        assert!(is_valid_name("ns:metric"));
        assert!(!is_valid_name("1metric"));
        assert!(!is_valid_name("bad-name"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_invalid_label_is_rejected_by_prometheus_sink() {
        let sink = PrometheusSink::new().unwrap();
        let err = sink
            .increment_counter(HTTP_REQUESTS_TOTAL, vec![("bad-label", "x".into())], 1)
            .unwrap_err();
        assert!(matches!(err, MetricsError::InvalidLabel { .. }));
    }
}
