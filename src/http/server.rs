//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the status, metrics and breaker endpoints
//! - Wire up middleware (tracing, correlation, timeout, metrics)
//! - Hold shared application state, including the hot-swappable config
//! - Serve until the shutdown broadcast fires

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::client::OutboundClient;
use crate::config::{check_health_deadline, DependencyCheckConfig, ServiceConfig};
use crate::health::{http_check, HealthChecker};
use crate::http::handlers;
use crate::http::middleware::{correlation_middleware, metrics_middleware};
use crate::observability::metrics::MetricsRecorder;
use crate::resilience::BreakerRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<ServiceConfig>>,
    pub health: Arc<HealthChecker>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: MetricsRecorder,
    /// Render handle for `/metrics`; `None` when metrics are disabled.
    pub prometheus: Option<PrometheusHandle>,
    /// Client used by configured HTTP dependency checks.
    pub http: reqwest::Client,
    /// Retry + breaker guarded client for calls to dependencies.
    pub outbound: OutboundClient,
    /// Cancelled on shutdown; parent of every health aggregation pass.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Register the HTTP checks listed in the config.
    pub fn register_dependency_checks(&self, dependencies: &[DependencyCheckConfig]) {
        for dep in dependencies {
            self.health.add_check(
                dep.name.clone(),
                http_check(self.http.clone(), dep.url.clone(), Duration::from_millis(dep.timeout_ms)),
            );
        }
    }

    /// Swap in a reloaded config.
    ///
    /// Re-applies the aggregation timeout and syncs the config-declared
    /// dependency checks. Checks registered in code are left alone. Retry and
    /// breaker settings and the request timeout apply from the next restart,
    /// so the running request timeout is kept and a health timeout that no
    /// longer fits inside it is rejected.
    pub fn apply_config(&self, mut config: ServiceConfig) -> bool {
        config.timeouts = self.config.load().timeouts.clone();
        if let Err(e) = check_health_deadline(&config) {
            tracing::error!(error = %e, "Rejected reloaded configuration, keeping current configuration");
            return false;
        }

        let previous = self.config.swap(Arc::new(config));
        let current = self.config.load();

        for dep in &previous.health.dependencies {
            if !current.health.dependencies.iter().any(|d| d.name == dep.name) {
                self.health.remove_check(&dep.name);
            }
        }
        self.register_dependency_checks(&current.health.dependencies);
        self.health.set_timeout(current.health.timeout());

        tracing::info!(
            dependencies = current.health.dependencies.len(),
            health_timeout_ms = current.health.timeout_ms,
            "Configuration applied"
        );
        true
    }
}

/// HTTP server exposing the service's resilience state.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let request_timeout = state.config.load().timeouts.request();

        Router::new()
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .route("/breakers", get(handlers::breakers))
            .route_layer(middleware::from_fn_with_state(state.metrics.clone(), metrics_middleware))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(middleware::from_fn(correlation_middleware))
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for embedding or for driving with `oneshot` in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let token = self.state.shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                token.cancel();
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
