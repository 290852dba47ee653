//! Status, metrics and breaker endpoints driven through the router.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use service_resilience::config::{DependencyCheckConfig, ServiceConfig};
use service_resilience::health::{static_check, DependencyHealth};
use service_resilience::http::HttpServer;
use service_resilience::resilience::OperationError;

mod common;

async fn get(server: &HttpServer, path: &str, headers: &[(&str, &str)]) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = server.router().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

#[tokio::test]
async fn test_health_degraded_is_200() {
    let state = common::test_state(ServiceConfig::default());
    state.health.add_check("db", static_check(DependencyHealth::healthy("ok")));
    state.health.add_check("cache", static_check(DependencyHealth::degraded("slow")));
    let server = HttpServer::new(state);

    let (status, _, body) = get(&server, "/health", &[]).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["service"], "test-service");
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["total_checks"], 2);
    assert_eq!(json["healthy"], 1);
    assert_eq!(json["degraded"], 1);
    assert_eq!(json["unhealthy"], 0);
    assert_eq!(json["dependencies"]["cache"]["message"], "slow");
}

#[tokio::test]
async fn test_health_unhealthy_is_503() {
    let state = common::test_state(ServiceConfig::default());
    state.health.add_check("db", static_check(DependencyHealth::unhealthy("connection refused")));
    let server = HttpServer::new(state);

    let (status, _, body) = get(&server, "/health", &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn test_configured_http_dependencies() {
    let up = common::start_mock_backend(200).await;
    let flaky = common::start_mock_backend(500).await;
    let down = common::closed_port().await;

    let mut config = ServiceConfig::default();
    config.health.dependencies = vec![
        DependencyCheckConfig {
            name: "up".into(),
            url: format!("http://{}/health", up),
            timeout_ms: 1_000,
        },
        DependencyCheckConfig {
            name: "flaky".into(),
            url: format!("http://{}/health", flaky),
            timeout_ms: 1_000,
        },
        DependencyCheckConfig {
            name: "down".into(),
            url: format!("http://{}/health", down),
            timeout_ms: 1_000,
        },
    ];
    let server = HttpServer::new(common::test_state(config));

    let (status, _, body) = get(&server, "/health", &[]).await;
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["dependencies"]["up"]["status"], "healthy");
    assert_eq!(json["dependencies"]["up"]["details"]["status_code"], 200);
    assert_eq!(json["dependencies"]["flaky"]["status"], "degraded");
    assert_eq!(json["dependencies"]["down"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_correlation_headers_echoed() {
    let server = HttpServer::new(common::test_state(ServiceConfig::default()));

    let (_, headers, _) = get(
        &server,
        "/health",
        &[("x-request-id", "req-123"), ("x-span-id", "00f067aa0ba902b7")],
    )
    .await;
    assert_eq!(headers["x-correlation-id"], "req-123");
    assert_eq!(headers["x-request-id"], "req-123");
    assert_eq!(headers["x-span-id"], "00f067aa0ba902b7");
    assert!(headers.get("x-trace-id").is_none());

    let (_, headers, _) = get(&server, "/health", &[]).await;
    let generated = headers["x-correlation-id"].to_str().unwrap();
    assert!(service_resilience::observability::correlation::validate_id(generated));
}

#[tokio::test]
async fn test_breakers_endpoint() {
    let state = common::test_state(ServiceConfig::default());
    let breaker = state.breakers.get("billing");
    let _ = breaker.execute(|| Err::<(), _>(OperationError::status(503, "down")));
    state.breakers.get("search").force_open();
    let server = HttpServer::new(state);

    let (status, _, body) = get(&server, "/breakers", &[]).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["name"], "billing");
    assert_eq!(list[0]["state"], "CLOSED");
    assert_eq!(list[0]["failures"], 1);
    assert_eq!(list[1]["name"], "search");
    assert_eq!(list[1]["state"], "OPEN");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let state = common::test_state(ServiceConfig::default());
    state.health.add_check("db", static_check(DependencyHealth::healthy("ok")));
    let server = HttpServer::new(state);

    get(&server, "/health", &[]).await;
    let (status, headers, body) = get(&server, "/metrics", &[]).await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/plain"));
    assert!(text.contains("health_check_status"));
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("route=\"/health\""));
}

#[tokio::test]
async fn test_metrics_disabled() {
    let mut config = ServiceConfig::default();
    config.observability.metrics_enabled = false;
    let server = HttpServer::new(common::test_state(config));

    let (status, _, _) = get(&server, "/metrics", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_apply_config_reload() {
    let up = common::start_mock_backend(200).await;
    let mut config = ServiceConfig::default();
    config.health.dependencies = vec![DependencyCheckConfig {
        name: "old".into(),
        url: format!("http://{}/", up),
        timeout_ms: 500,
    }];
    let state = common::test_state(config.clone());
    state.health.add_check("in-code", static_check(DependencyHealth::healthy("ok")));

    config.health.timeout_ms = 1_500;
    config.health.dependencies[0].name = "new".into();
    assert!(state.apply_config(config));

    assert_eq!(state.health.timeout(), Duration::from_millis(1_500));
    assert_eq!(state.health.check_names(), vec!["in-code".to_string(), "new".to_string()]);

    let snapshot = state.health.check_health(&CancellationToken::new()).await;
    assert_eq!(snapshot.dependencies["new"].status, service_resilience::HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_hung_check_still_returns_snapshot() {
    let state = common::test_state(ServiceConfig::default());
    state.health.add_check("db", static_check(DependencyHealth::healthy("ok")));
    state.health.add_check("hung", |_cancel: CancellationToken| async move {
        std::future::pending::<()>().await;
        None::<DependencyHealth>
    });
    let handle = state.prometheus.clone().unwrap();
    let server = HttpServer::new(state);

    let (status, _, body) = get(&server, "/health", &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["dependencies"]["hung"]["message"], "health check timed out");
    assert_eq!(json["dependencies"]["db"]["status"], "healthy");

    let output = handle.render();
    let in_flight = output
        .lines()
        .find(|line| line.starts_with("http_requests_in_flight{"))
        .unwrap();
    assert!(in_flight.ends_with(" 0"), "{}", in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_releases_in_flight() {
    let state = common::test_state(ServiceConfig::default());
    state.health.add_check("hung", |_cancel: CancellationToken| async move {
        std::future::pending::<()>().await;
        None::<DependencyHealth>
    });
    let handle = state.prometheus.clone().unwrap();
    let server = HttpServer::new(state);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let pending = server.router().oneshot(request);
    // The caller gives up well before the aggregation deadline.
    assert!(tokio::time::timeout(Duration::from_millis(10), pending).await.is_err());

    let output = handle.render();
    let in_flight = output
        .lines()
        .find(|line| line.starts_with("http_requests_in_flight{"))
        .unwrap();
    assert!(in_flight.ends_with(" 0"), "{}", in_flight);
}

#[tokio::test]
async fn test_apply_config_rejects_health_timeout_beyond_request_timeout() {
    let state = common::test_state(ServiceConfig::default());
    let running = state.health.timeout();

    let mut config = ServiceConfig::default();
    config.timeouts.request_secs = 120;
    config.health.timeout_ms = 60_000;

    assert!(!state.apply_config(config));
    assert_eq!(state.health.timeout(), running);
    assert_eq!(state.config.load().health.timeout_ms, 30_000);
}
