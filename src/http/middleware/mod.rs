//! Inbound middleware.
//!
//! Layer order (outermost first): trace → correlation → timeout → route → metrics.

pub mod correlation;
pub mod metrics;

pub use correlation::correlation_middleware;
pub use metrics::metrics_middleware;
