//! Endpoint handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::health::ServiceHealth;
use crate::http::server::AppState;
use crate::observability::correlation::RequestScope;
use crate::resilience::BreakerStats;

/// `GET /health`: 200 when healthy or degraded, 503 when unhealthy.
pub async fn health(State(state): State<AppState>, scope: RequestScope) -> ServiceHealth {
    let snapshot = state.health.check_health(&state.shutdown).await;
    if snapshot.unhealthy > 0 {
        tracing::warn!(
            correlation_id = %scope.log_correlation_id(),
            status = %snapshot.status,
            unhealthy = snapshot.unhealthy,
            "Service reported unhealthy dependencies"
        );
    }
    snapshot
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    if !state.config.load().observability.metrics_enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    }
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// `GET /breakers`: one entry per known dependency breaker.
pub async fn breakers(State(state): State<AppState>) -> Json<Vec<BreakerStats>> {
    Json(state.breakers.stats())
}
