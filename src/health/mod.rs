//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (aggregator.rs):
//!     add_check(name, check) → registry (own lock)
//!
//! Aggregation pass (aggregator.rs):
//!     check_health(token)
//!     → one spawned task per check (checks.rs or caller-supplied)
//!     → race each against the shared deadline and the caller's token
//!     → DependencyHealth per check (timeouts/panics become unhealthy)
//!     → ServiceHealth snapshot (status.rs), worst status wins
//!
//! Status endpoint:
//!     ServiceHealth → 200 (healthy/degraded) or 503 (unhealthy) + JSON
//! ```
//!
//! # Design Decisions
//! - A pass always produces a snapshot; check failures never escape as errors
//! - Unhealthy dominates degraded dominates healthy
//! - Records are produced fresh on every pass and never stored

pub mod aggregator;
pub mod checks;
pub mod status;

pub use aggregator::{CheckFuture, HealthCheck, HealthChecker, DEFAULT_TIMEOUT};
pub use checks::{http_check, probe_check, static_check};
pub use status::{DependencyHealth, HealthStatus, ServiceHealth};
