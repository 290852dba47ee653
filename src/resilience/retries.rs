//! Retry logic.
//!
//! # Responsibilities
//! - Classify errors as retryable by status code
//! - Execute attempts sequentially with backoff between them
//! - Stop promptly on cancellation, both mid-attempt and mid-wait
//!
//! # Design Decisions
//! - Only errors carrying a configured status code are retried; everything else
//!   is returned after the first failure
//! - Jittered backoff prevents thundering herd
//! - The policy is immutable and shared; the executor only adds metric labels

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{BackoffKind, RetryConfig};
use crate::observability::metrics::MetricsRecorder;
use crate::resilience::backoff::{scale, with_jitter, BackoffStrategy};
use crate::resilience::StatusCoded;

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired before or between attempts.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation failed with an error the policy does not retry.
    #[error("{0}")]
    NonRetryable(E),

    /// Every attempt failed with a retryable error.
    #[error("max retry attempts ({attempts}) exceeded: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    /// The operation error behind a non-retryable or exhausted outcome.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::NonRetryable(e) | RetryError::Exhausted { last: e, .. } => Some(e),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::NonRetryable(e) | RetryError::Exhausted { last: e, .. } => Some(e),
        }
    }
}

/// A ready-made error for operations that report a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("operation failed (status: {code}): {message}")]
    Status { code: u16, message: String },

    #[error("operation failed: {0}")]
    Other(String),
}

impl OperationError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        OperationError::Status {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        OperationError::Other(message.into())
    }
}

impl StatusCoded for OperationError {
    fn status_code(&self) -> Option<u16> {
        match self {
            OperationError::Status { code, .. } => Some(*code),
            OperationError::Other(_) => None,
        }
    }
}

/// Immutable retry configuration, reused across calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    retryable_codes: BTreeSet<u16>,
    backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable_codes: DEFAULT_RETRYABLE_CODES.into_iter().collect(),
            backoff: BackoffStrategy::Progressive,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from validated configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = match config.strategy {
            BackoffKind::Progressive => BackoffStrategy::Progressive,
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                factor: config.backoff_factor,
            },
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Constant => BackoffStrategy::Constant,
            BackoffKind::Fibonacci => BackoffStrategy::Fibonacci,
        };

        Self::default()
            .with_max_attempts(config.max_attempts)
            .with_initial_delay(Duration::from_millis(config.initial_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_backoff_factor(config.backoff_factor)
            .with_jitter(config.jitter)
            .with_retryable_codes(config.retryable_status_codes.iter().copied())
            .with_backoff(backoff)
    }

    /// No retries at all.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    pub fn retryable_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_codes
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Retryable iff the error carries a configured status code.
    pub fn is_retryable<E: StatusCoded + ?Sized>(&self, error: &E) -> bool {
        error
            .status_code()
            .is_some_and(|code| self.retryable_codes.contains(&code))
    }

    /// Unjittered wait sequence: the delay seed followed by the strategy.
    fn schedule(&self) -> DelaySchedule<'_> {
        DelaySchedule {
            policy: self,
            next: self.initial_delay.min(self.max_delay),
            attempt: 0,
        }
    }

    /// Run `operation` under this policy without metrics.
    pub async fn retry<T, E, F, Fut>(&self, cancel: &CancellationToken, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StatusCoded + fmt::Display,
    {
        Retry::new(self.clone()).run(cancel, operation).await
    }
}

/// Iterator over the waits between attempts (before jitter).
struct DelaySchedule<'a> {
    policy: &'a RetryPolicy,
    next: Duration,
    attempt: u32,
}

impl Iterator for DelaySchedule<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let policy = self.policy;
        let delay = match policy.backoff.delay(self.attempt, policy.initial_delay) {
            Some(delay) => delay.min(policy.max_delay),
            None => {
                let current = self.next;
                self.next = scale(current, policy.backoff_factor).min(policy.max_delay);
                current
            }
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

/// Retry executor: a shared policy plus optional metric labels.
#[derive(Debug, Clone)]
pub struct Retry {
    policy: Arc<RetryPolicy>,
    observer: Option<RetryObserver>,
}

#[derive(Debug, Clone)]
struct RetryObserver {
    metrics: MetricsRecorder,
    dependency: String,
    method: String,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::shared(Arc::new(policy))
    }

    pub fn shared(policy: Arc<RetryPolicy>) -> Self {
        Self { policy, observer: None }
    }

    /// Count attempts and exhaustion under (`dependency`, `method`).
    pub fn with_metrics(mut self, metrics: MetricsRecorder, dependency: impl Into<String>, method: impl Into<String>) -> Self {
        self.observer = Some(RetryObserver {
            metrics,
            dependency: dependency.into(),
            method: method.into(),
        });
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt `operation` up to `max_attempts` times.
    ///
    /// Returns the first success. Cancellation is observed before each attempt,
    /// while an attempt is in flight, and while waiting out a backoff delay.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StatusCoded + fmt::Display,
    {
        let policy = &self.policy;
        let mut schedule = policy.schedule();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            attempt += 1;
            if attempt > 1 {
                if let Some(observer) = &self.observer {
                    observer.metrics.record_retry_attempt(&observer.dependency, &observer.method);
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation() => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !policy.is_retryable(&error) {
                tracing::debug!(attempt, error = %error, "Non-retryable failure");
                return Err(RetryError::NonRetryable(error));
            }

            if attempt >= policy.max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "Retry attempts exhausted");
                if let Some(observer) = &self.observer {
                    observer.metrics.record_retry_failure(&observer.dependency, &observer.method);
                }
                return Err(RetryError::Exhausted { attempts: attempt, last: error });
            }

            let base = schedule.next().unwrap_or(policy.max_delay);
            let wait = match (&policy.backoff, policy.jitter) {
                (BackoffStrategy::Progressive, true) => with_jitter(base),
                _ => base,
            };
            tracing::debug!(attempt, delay = ?wait, error = %error, "Retrying after failure");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
