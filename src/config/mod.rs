//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → shared via ArcSwap to the HTTP layer, copied into components at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<ServiceConfig>
//!     → health aggregation timeout re-applied
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackoffKind, CircuitBreakerConfig, DependencyCheckConfig, HealthConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RetryConfig, ServiceConfig, ServiceInfo, TimeoutConfig,
};
pub use validation::{check_health_deadline, validate_config, ValidationError};
