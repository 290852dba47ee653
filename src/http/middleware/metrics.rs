//! Inbound request metrics.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::observability::metrics::MetricsRecorder;

/// Holds one slot of the in-flight gauge. Released on drop, so requests cut
/// short by the timeout layer or a client disconnect are still released.
struct InFlight<'a> {
    metrics: &'a MetricsRecorder,
    method: &'a str,
    route: &'a str,
}

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a MetricsRecorder, method: &'a str, route: &'a str) -> Self {
        metrics.http_request_started(method, route);
        Self { metrics, method, route }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.http_request_finished(self.method, self.route);
    }
}

/// Count, time and track in-flight requests by method and matched route.
///
/// Installed with `route_layer`, so the route template (not the raw path) is
/// the label and unmatched requests are not recorded.
pub async fn metrics_middleware(State(metrics): State<MetricsRecorder>, req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let in_flight = InFlight::enter(&metrics, &method, &route);
    let start = Instant::now();

    let response = next.run(req).await;

    drop(in_flight);
    metrics.record_http_request(&method, &route, response.status().as_u16(), start.elapsed());
    response
}
