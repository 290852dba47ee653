//! Resilience and observability primitives for service-to-service calls.
//!
//! - [`resilience`]: circuit breaker, retry executor, backoff strategies
//! - [`health`]: concurrent health aggregation and ready-made checks
//! - [`observability`]: correlation context, metrics recorder, logging
//! - [`client`]: outbound HTTP client guarded by retry and breaker
//! - [`http`], [`config`], [`lifecycle`]: the runtime that serves it all

pub mod client;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::{CallError, OutboundClient};
pub use config::schema::ServiceConfig;
pub use health::{HealthChecker, HealthStatus, ServiceHealth};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::{CorrelationContext, MetricsRecorder, RequestScope};
pub use resilience::{BreakerRegistry, CircuitBreaker, Retry, RetryPolicy};
