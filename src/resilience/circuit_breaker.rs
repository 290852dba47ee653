//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: the next call probes whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: lazily, on the first ready() after open_duration since the last failure
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails and the failure count reaches max_failures
//! ```
//!
//! # Design Decisions
//! - Per-dependency breaker (not global), see [`BreakerRegistry`](super::registry::BreakerRegistry)
//! - Count-based: only consecutive failures since the last success count, no sliding window
//! - Readiness and outcome recording are two separate critical sections. Two callers
//!   can both pass `ready()` and both run; half-open is therefore not single-flight.
//! - The wrapped operation's error is returned untouched inside [`BreakerError::Inner`]

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics::MetricsRecorder;
use crate::resilience::StatusCoded;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: 0=closed, 1=half-open, 2=open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a breaker-protected call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker refused the call without running it.
    #[error("circuit breaker for {dependency} is OPEN")]
    Open { dependency: String },

    /// The operation overran the monitor timeout and was dropped.
    #[error("{dependency} did not complete within {after:?}")]
    Timeout { dependency: String, after: Duration },

    /// The operation's own error.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The wrapped operation error, if the operation ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: StatusCoded> StatusCoded for BreakerError<E> {
    fn status_code(&self) -> Option<u16> {
        match self {
            // Fail-fast refusals are never retryable.
            BreakerError::Open { .. } => None,
            BreakerError::Timeout { .. } => Some(408),
            BreakerError::Inner(e) => e.status_code(),
        }
    }
}

/// Point-in-time view of a breaker, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub max_failures: u32,
    pub last_error: Option<String>,
    pub seconds_since_last_failure: Option<f64>,
    pub ready: bool,
    pub open_duration_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_error: Option<String>,
    last_failure: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_error: None,
            last_failure: None,
        }
    }

    fn open_elapsed(&self, open_duration: Duration) -> bool {
        match self.last_failure {
            Some(at) => at.elapsed() >= open_duration,
            None => true,
        }
    }
}

/// Count-based circuit breaker guarding one dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Option<MetricsRecorder>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failures", &self.failures())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
            metrics: None,
        }
    }

    /// Report state changes and failures through `recorder`.
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        recorder.record_circuit_state(&self.name, CircuitState::Closed);
        self.metrics = Some(recorder);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may proceed. Performs the lazy Open → Half-Open transition.
    pub fn ready(&self) -> bool {
        let (transition, ready) = {
            let mut inner = self.lock();
            let transition =
                if inner.state == CircuitState::Open && inner.open_elapsed(self.config.open_duration()) {
                    inner.state = CircuitState::HalfOpen;
                    Some((CircuitState::Open, CircuitState::HalfOpen))
                } else {
                    None
                };
            (transition, inner.state != CircuitState::Open)
        };
        self.report_transition(transition);
        ready
    }

    /// Run `operation` once if the breaker admits it, recording the outcome.
    pub fn execute<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        if !self.ready() {
            return Err(self.refusal());
        }

        let result = operation();
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e.to_string()),
        }
        result.map_err(BreakerError::Inner)
    }

    /// Async variant of [`execute`](Self::execute).
    ///
    /// With a monitor timeout configured, an overrunning operation is dropped,
    /// counted as a failure and reported as [`BreakerError::Timeout`].
    pub async fn execute_async<T, E, Fut>(&self, operation: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if !self.ready() {
            return Err(self.refusal());
        }

        let result = match self.config.monitor_timeout() {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => {
                    self.record_failure(format!("operation timed out after {:?}", limit));
                    return Err(BreakerError::Timeout {
                        dependency: self.name.clone(),
                        after: limit,
                    });
                }
            },
            None => operation.await,
        };

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e.to_string()),
        }
        result.map_err(BreakerError::Inner)
    }

    fn refusal<E>(&self) -> BreakerError<E> {
        tracing::debug!(dependency = %self.name, "Circuit open, refusing call");
        BreakerError::Open {
            dependency: self.name.clone(),
        }
    }

    /// Record a successful outcome.
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.failures = 0;
            inner.last_error = None;
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                Some((CircuitState::HalfOpen, CircuitState::Closed))
            } else {
                None
            }
        };
        self.report_transition(transition);
    }

    /// Record a failed outcome.
    pub fn record_failure(&self, error: impl Into<String>) {
        let transition = {
            let mut inner = self.lock();
            inner.failures = inner.failures.saturating_add(1);
            inner.last_error = Some(error.into());
            inner.last_failure = Some(Instant::now());

            let from = inner.state;
            let trips = match from {
                CircuitState::Closed | CircuitState::HalfOpen => inner.failures >= self.config.max_failures,
                CircuitState::Open => false,
            };
            if trips {
                inner.state = CircuitState::Open;
                Some((from, CircuitState::Open))
            } else {
                None
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_failure(&self.name);
        }
        self.report_transition(transition);
    }

    /// Force the breaker open. The open duration restarts from now.
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.state = CircuitState::Open;
            inner.last_failure = Some(Instant::now());
            (from != CircuitState::Open).then_some((from, CircuitState::Open))
        };
        self.report_transition(transition);
    }

    /// Force the breaker closed and clear the failure count.
    pub fn force_close(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.last_error = None;
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        self.report_transition(transition);
    }

    /// Return to the initial state, forgetting the last failure as well.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            *inner = BreakerInner::closed();
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        self.report_transition(transition);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }

    /// Snapshot without performing the lazy transition.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let ready = match inner.state {
            CircuitState::Open => inner.open_elapsed(self.config.open_duration()),
            _ => true,
        };

        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            max_failures: self.config.max_failures,
            last_error: inner.last_error.clone(),
            seconds_since_last_failure: inner.last_failure.map(|at| at.elapsed().as_secs_f64()),
            ready,
            open_duration_ms: self.config.open_duration_ms,
        }
    }

    fn report_transition(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else {
            return;
        };

        match to {
            CircuitState::Open => {
                tracing::warn!(dependency = %self.name, from = %from, "Circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                tracing::info!(dependency = %self.name, "Circuit breaker half-open, admitting probe");
            }
            CircuitState::Closed => {
                tracing::info!(dependency = %self.name, from = %from, "Circuit breaker closed");
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_transition(&self.name, from, to);
        }
    }
}
