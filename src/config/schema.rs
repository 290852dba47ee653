//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::retries::DEFAULT_RETRYABLE_CODES;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service identity.
    pub service: ServiceInfo,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Inbound request timeouts.
    pub timeouts: TimeoutConfig,

    /// Health aggregation settings and dependency checks.
    pub health: HealthConfig,

    /// Retry policy for outbound calls.
    pub retries: RetryConfig,

    /// Circuit breaker settings shared by every dependency.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceInfo {
    /// Name reported on the status endpoint and in metric labels.
    pub name: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "service".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    /// Must leave room for a full health aggregation pass.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 35 }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Health aggregation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Shared deadline for one aggregation pass, in milliseconds.
    pub timeout_ms: u64,

    /// HTTP reachability checks registered at startup.
    pub dependencies: Vec<DependencyCheckConfig>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            dependencies: Vec::new(),
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A dependency probed over HTTP.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DependencyCheckConfig {
    /// Dependency name (key in the status document).
    pub name: String,

    /// URL probed with GET.
    pub url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_check_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_check_timeout_ms() -> u64 {
    5_000
}

/// Backoff strategy selector.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Previous delay times the backoff factor, with jitter.
    #[default]
    Progressive,
    Exponential,
    Linear,
    Constant,
    Fibonacci,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// First backoff delay in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier applied between successive delays.
    pub backoff_factor: f64,

    /// Add up to 10% random jitter to progressive delays.
    pub jitter: bool,

    /// Status codes that make a failure retryable.
    pub retryable_status_codes: Vec<u16>,

    /// Delay progression.
    pub strategy: BackoffKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
            retryable_status_codes: DEFAULT_RETRYABLE_CODES.to_vec(),
            strategy: BackoffKind::Progressive,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub max_failures: u32,

    /// Time since the last failure before a probe is admitted, in milliseconds.
    pub open_duration_ms: u64,

    /// Optional bound on a single async call, in milliseconds.
    pub monitor_timeout_ms: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_duration_ms: 60_000,
            monitor_timeout_ms: Some(10_000),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    pub fn monitor_timeout(&self) -> Option<Duration> {
        self.monitor_timeout_ms.map(Duration::from_millis)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ServiceConfig = toml::from_str("[service]\nname = \"orders\"\n").unwrap();
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.health.timeout(), Duration::from_secs(30));
        assert_eq!(config.retries.retryable_status_codes, vec![408, 429, 500, 502, 503, 504]);
        assert_eq!(config.circuit_breaker.monitor_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_full_config() {
        let raw = r#"
            [health]
            timeout_ms = 2000

            [[health.dependencies]]
            name = "billing"
            url = "http://billing.internal/health"

            [retries]
            strategy = "fibonacci"
            jitter = false

            [circuit_breaker]
            max_failures = 2
            open_duration_ms = 500

            [observability]
            log_format = "json"
        "#;
        let config: ServiceConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.health.dependencies.len(), 1);
        assert_eq!(config.health.dependencies[0].timeout_ms, 5_000);
        assert_eq!(config.retries.strategy, BackoffKind::Fibonacci);
        assert!(!config.retries.jitter);
        assert_eq!(config.circuit_breaker.open_duration(), Duration::from_millis(500));
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
