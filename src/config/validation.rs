//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts >= 1, non-zero timeouts, ordered delays)
//! - Check dependency checks are uniquely named and point at real URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: &ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Headroom kept between the health aggregation deadline and the request timeout.
pub const HEALTH_DEADLINE_MARGIN_MS: u64 = 1_000;

/// The aggregation pass must end before the request timeout fires, or
/// `/health` answers with a bare timeout instead of a snapshot.
pub fn check_health_deadline(config: &ServiceConfig) -> Result<(), ValidationError> {
    let request_ms = config.timeouts.request_secs.saturating_mul(1_000);
    if config.health.timeout_ms.saturating_add(HEALTH_DEADLINE_MARGIN_MS) > request_ms {
        return Err(ValidationError::new(
            "health.timeout_ms",
            format!(
                "{}ms does not fit within timeouts.request_secs ({}s) minus {}ms",
                config.health.timeout_ms, config.timeouts.request_secs, HEALTH_DEADLINE_MARGIN_MS
            ),
        ));
    }
    Ok(())
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    if config.health.timeout_ms == 0 {
        errors.push(ValidationError::new("health.timeout_ms", "must be greater than zero"));
    } else if config.timeouts.request_secs > 0 {
        if let Err(e) = check_health_deadline(config) {
            errors.push(e);
        }
    }

    let mut seen = HashSet::new();
    for (i, dep) in config.health.dependencies.iter().enumerate() {
        let field = |name: &str| format!("health.dependencies[{}].{}", i, name);
        if dep.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !seen.insert(dep.name.as_str()) {
            errors.push(ValidationError::new(field("name"), format!("duplicate dependency '{}'", dep.name)));
        }
        match url::Url::parse(&dep.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                field("url"),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(field("url"), e.to_string())),
        }
        if dep.timeout_ms == 0 {
            errors.push(ValidationError::new(field("timeout_ms"), "must be greater than zero"));
        }
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if !(retries.backoff_factor >= 1.0 && retries.backoff_factor.is_finite()) {
        errors.push(ValidationError::new("retries.backoff_factor", "must be a finite number >= 1.0"));
    }
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than retries.initial_delay_ms",
        ));
    }
    if let Some(code) = retries
        .retryable_status_codes
        .iter()
        .find(|code| !(100..=599).contains(*code))
    {
        errors.push(ValidationError::new(
            "retries.retryable_status_codes",
            format!("{} is not an HTTP status code", code),
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.max_failures == 0 {
        errors.push(ValidationError::new("circuit_breaker.max_failures", "must be at least 1"));
    }
    if breaker.monitor_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            "circuit_breaker.monitor_timeout_ms",
            "must be greater than zero when set",
        ));
    }

    if !matches!(
        config.observability.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
