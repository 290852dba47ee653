//! Outbound call errors.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::{BreakerError, RetryError, StatusCoded};

#[derive(Debug, Error)]
pub enum CallError {
    /// The dependency answered with a non-2xx status.
    #[error("{dependency} responded with status {status}")]
    Status { dependency: String, status: u16 },

    /// The request never produced a response.
    #[error("request to {dependency} failed: {source}")]
    Transport {
        dependency: String,
        #[source]
        source: reqwest::Error,
    },

    /// The dependency's circuit breaker refused the call.
    #[error("circuit breaker for {dependency} is OPEN")]
    BreakerOpen { dependency: String },

    /// The breaker's monitor timeout cut the call short.
    #[error("call to {dependency} did not complete within {after:?}")]
    Timeout { dependency: String, after: Duration },

    #[error("call to {dependency} cancelled")]
    Cancelled { dependency: String },

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("max retry attempts ({attempts}) exceeded: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<CallError>,
    },
}

impl CallError {
    /// Flatten a retry outcome into a single error.
    pub(crate) fn from_retry(dependency: &str, error: RetryError<CallError>) -> Self {
        match error {
            RetryError::Cancelled => CallError::Cancelled {
                dependency: dependency.to_string(),
            },
            RetryError::NonRetryable(e) => e,
            RetryError::Exhausted { attempts, last } => CallError::Exhausted {
                attempts,
                last: Box::new(last),
            },
        }
    }

    /// Label used on the service-call metrics.
    pub fn metric_status(&self) -> &'static str {
        match self {
            CallError::Status { status, .. } if *status >= 500 => "server_error",
            CallError::Status { .. } => "client_error",
            CallError::Transport { .. } => "transport_error",
            CallError::BreakerOpen { .. } => "circuit_open",
            CallError::Timeout { .. } => "timeout",
            CallError::Cancelled { .. } => "cancelled",
            CallError::InvalidUrl { .. } | CallError::Encode(_) => "invalid_request",
            CallError::Exhausted { last, .. } => last.metric_status(),
        }
    }
}

impl From<BreakerError<CallError>> for CallError {
    fn from(error: BreakerError<CallError>) -> Self {
        match error {
            BreakerError::Open { dependency } => CallError::BreakerOpen { dependency },
            BreakerError::Timeout { dependency, after } => CallError::Timeout { dependency, after },
            BreakerError::Inner(e) => e,
        }
    }
}

impl StatusCoded for CallError {
    fn status_code(&self) -> Option<u16> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            CallError::Transport { source, .. } if source.is_timeout() => Some(408),
            CallError::Transport { source, .. } if source.is_connect() => Some(503),
            CallError::Transport { source, .. } => source.status_code(),
            CallError::Timeout { .. } => Some(408),
            CallError::Exhausted { last, .. } => last.status_code(),
            CallError::BreakerOpen { .. }
            | CallError::Cancelled { .. }
            | CallError::InvalidUrl { .. }
            | CallError::Encode(_) => None,
        }
    }
}
