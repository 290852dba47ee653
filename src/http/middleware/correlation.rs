//! Correlation middleware.
//! Attaches a RequestScope to every request and echoes the identifiers back.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::Instrument;

use crate::observability::correlation::{sanitize_id, CorrelationContext, RequestScope};

pub async fn correlation_middleware(mut req: Request<Body>, next: Next) -> Response {
    let context = CorrelationContext::from_headers(req.headers());

    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        correlation_id = %sanitize_id(context.correlation_id()),
        request_id = %sanitize_id(context.request_id()),
        trace_id = tracing::field::Empty,
        span_id = tracing::field::Empty,
    );
    if !context.trace_id().is_empty() {
        span.record("trace_id", sanitize_id(context.trace_id()).as_str());
    }
    if !context.span_id().is_empty() {
        span.record("span_id", sanitize_id(context.span_id()).as_str());
    }

    req.extensions_mut().insert(RequestScope::new(context.clone()));

    let mut response = next.run(req).instrument(span).await;
    context.inject(response.headers_mut());
    response
}
