//! Outbound calls to dependencies.
//!
//! # Data Flow
//! ```text
//! caller (with RequestScope)
//!     → outbound.rs: correlation headers injected
//!     → Retry (resilience/retries.rs), classifies by CallError status code
//!         → CircuitBreaker for the dependency (resilience/registry.rs)
//!             → reqwest request; non-2xx becomes CallError::Status
//!     → service-call metrics recorded per attempt
//! ```

pub mod error;
pub mod outbound;

pub use error::CallError;
pub use outbound::OutboundClient;
