//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order from a validated config
//! - Register the configured dependency checks
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Metrics first, since every other component reports through them
//! - Listeners are bound by the caller, after state is ready

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::OutboundClient;
use crate::config::ServiceConfig;
use crate::health::HealthChecker;
use crate::http::AppState;
use crate::observability::metrics::{MetricsError, MetricsRecorder};
use crate::resilience::{BreakerRegistry, RetryPolicy};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Build the shared application state.
pub fn build_state(config: ServiceConfig, shutdown: CancellationToken) -> Result<AppState, StartupError> {
    let service = config.service.name.clone();

    let (metrics, prometheus) = if config.observability.metrics_enabled {
        let (recorder, handle) = MetricsRecorder::prometheus(service.clone())?;
        (recorder, Some(handle))
    } else {
        (MetricsRecorder::noop(service.clone()), None)
    };

    let http = reqwest::Client::builder().build()?;

    let health = HealthChecker::new(service).with_metrics(metrics.clone());
    health.set_timeout(config.health.timeout());

    let breakers = Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()).with_metrics(metrics.clone()));
    let outbound = OutboundClient::new(http.clone(), breakers.clone(), RetryPolicy::from_config(&config.retries))
        .with_metrics(metrics.clone());
    let dependencies = config.health.dependencies.clone();

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(config)),
        health: Arc::new(health),
        breakers,
        metrics,
        prometheus,
        http,
        outbound,
        shutdown,
    };
    state.register_dependency_checks(&dependencies);

    tracing::info!(
        service = %state.health.service(),
        checks = state.health.len(),
        metrics = state.prometheus.is_some(),
        "Subsystems initialized"
    );
    Ok(state)
}
