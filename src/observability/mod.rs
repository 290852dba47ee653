//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → correlation.rs (derive CorrelationContext, attach RequestScope)
//!     → request span carries sanitized correlation fields
//!
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms through MetricsRecorder)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → /metrics endpoint (Prometheus text exposition)
//! ```
//!
//! # Design Decisions
//! - The metrics recorder is constructed by the composition root and passed
//!   explicitly; nothing registers itself globally
//! - Recording a metric never fails the caller
//! - Correlation data is a typed request extension, not a string-keyed map

pub mod correlation;
pub mod logging;
pub mod metrics;

pub use correlation::{CorrelationContext, RequestScope};
pub use metrics::{MetricsRecorder, MetricsSink};
