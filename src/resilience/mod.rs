//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to a dependency:
//!     → retries.rs (classify failure by status code, back off, retry)
//!         → circuit_breaker.rs (fail fast while the dependency is down)
//!             → the operation itself
//! ```
//!
//! # Design Decisions
//! - Breakers are per dependency and live for the process (registry.rs)
//! - Retry wraps the breaker, never the other way round; a breaker refusal is not retryable
//! - Cancellation is a `CancellationToken` observed at every suspension point
//! - All resilience logic is composable around plain closures and futures

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;

pub use backoff::BackoffStrategy;
pub use circuit_breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState};
pub use registry::BreakerRegistry;
pub use retries::{OperationError, Retry, RetryError, RetryPolicy};

/// Errors that may carry a transport status code, used for retry classification.
pub trait StatusCoded {
    fn status_code(&self) -> Option<u16>;
}

impl StatusCoded for reqwest::Error {
    fn status_code(&self) -> Option<u16> {
        self.status().map(|status| status.as_u16())
    }
}

impl<T: StatusCoded + ?Sized> StatusCoded for Box<T> {
    fn status_code(&self) -> Option<u16> {
        (**self).status_code()
    }
}
