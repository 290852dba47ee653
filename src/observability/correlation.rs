//! Request correlation identifiers.
//!
//! # Responsibilities
//! - Derive a [`CorrelationContext`] from inbound headers
//! - Carry it through a request as a typed [`RequestScope`] extension
//! - Propagate it onto outbound requests and echo it on responses
//! - Validate and sanitize identifiers before they reach the logs
//!
//! # Design Decisions
//! - The correlation ID is always populated: it falls back to the request ID,
//!   then the trace ID, then a fresh UUID v4
//! - Contexts are values; setters return a new scope and never mutate the
//!   one other code may still be reading
//! - An absent field reads as the empty string

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");
pub const SPAN_ID_HEADER: HeaderName = HeaderName::from_static("x-span-id");

/// Longest identifier written to logs before truncation.
pub const MAX_LOGGED_ID_LEN: usize = 64;

/// Identifiers attached to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationContext {
    correlation_id: String,
    request_id: String,
    trace_id: String,
    span_id: String,
    user_id: String,
    session_id: String,
}

impl CorrelationContext {
    /// Build a context from explicit identifiers. An empty correlation ID is
    /// replaced by a generated one.
    pub fn new(
        correlation_id: impl Into<String>,
        request_id: impl Into<String>,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
    ) -> Self {
        let mut correlation_id = correlation_id.into();
        if correlation_id.is_empty() {
            correlation_id = generate_id();
        }
        Self {
            correlation_id,
            request_id: request_id.into(),
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            user_id: String::new(),
            session_id: String::new(),
        }
    }

    /// Derive the context for an inbound request.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = header(headers, &REQUEST_ID_HEADER);
        let trace_id = header(headers, &TRACE_ID_HEADER);
        let span_id = header(headers, &SPAN_ID_HEADER);

        let correlation_id = header(headers, &CORRELATION_ID_HEADER)
            .or_else(|| request_id.clone())
            .or_else(|| trace_id.clone())
            .unwrap_or_else(generate_id);

        Self {
            correlation_id,
            request_id: request_id.unwrap_or_else(generate_id),
            trace_id: trace_id.unwrap_or_default(),
            span_id: span_id.unwrap_or_default(),
            user_id: String::new(),
            session_id: String::new(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_empty()
            && self.request_id.is_empty()
            && self.trace_id.is_empty()
            && self.span_id.is_empty()
            && self.user_id.is_empty()
            && self.session_id.is_empty()
    }

    /// Set the populated propagation headers on `headers`, replacing existing values.
    pub fn inject(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (CORRELATION_ID_HEADER, &self.correlation_id),
            (REQUEST_ID_HEADER, &self.request_id),
            (TRACE_ID_HEADER, &self.trace_id),
            (SPAN_ID_HEADER, &self.span_id),
        ] {
            if value.is_empty() {
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => {
                    tracing::debug!(header = %name, value = %sanitize_id(value), "Skipping unrepresentable header value");
                }
            }
        }
    }

    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.inject(&mut headers);
        headers
    }

    /// Populated fields, keyed by log field name. Values are sanitized.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        [
            ("correlation_id", &self.correlation_id),
            ("request_id", &self.request_id),
            ("trace_id", &self.trace_id),
            ("span_id", &self.span_id),
            ("user_id", &self.user_id),
            ("session_id", &self.session_id),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key, sanitize_id(value)))
        .collect()
    }
}

impl fmt::Display for CorrelationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "correlation_id={}, request_id={}, trace_id={}, span_id={}, user_id={}, session_id={}",
            self.correlation_id, self.request_id, self.trace_id, self.span_id, self.user_id, self.session_id
        )
    }
}

/// The correlation context attached to a request, if any.
///
/// Inserted into request extensions by the correlation middleware and
/// extracted by handlers. Extraction never fails: without the middleware the
/// scope is empty and every accessor returns `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestScope {
    context: Option<CorrelationContext>,
}

impl RequestScope {
    pub fn new(context: CorrelationContext) -> Self {
        Self { context: Some(context) }
    }

    /// Scope holding a context built from explicit identifiers.
    pub fn with_correlation_context(
        correlation_id: impl Into<String>,
        request_id: impl Into<String>,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
    ) -> Self {
        Self::new(CorrelationContext::new(correlation_id, request_id, trace_id, span_id))
    }

    pub fn context(&self) -> Option<&CorrelationContext> {
        self.context.as_ref()
    }

    pub fn correlation_id(&self) -> &str {
        self.context.as_ref().map_or("", |c| c.correlation_id())
    }

    pub fn request_id(&self) -> &str {
        self.context.as_ref().map_or("", |c| c.request_id())
    }

    pub fn trace_id(&self) -> &str {
        self.context.as_ref().map_or("", |c| c.trace_id())
    }

    pub fn span_id(&self) -> &str {
        self.context.as_ref().map_or("", |c| c.span_id())
    }

    pub fn user_id(&self) -> &str {
        self.context.as_ref().map_or("", |c| c.user_id())
    }

    pub fn session_id(&self) -> &str {
        self.context.as_ref().map_or("", |c| c.session_id())
    }

    /// New scope with the user ID set. No-op on an empty scope.
    pub fn with_user_id(&self, user_id: impl Into<String>) -> Self {
        match &self.context {
            Some(context) => Self::new(context.clone().with_user_id(user_id)),
            None => self.clone(),
        }
    }

    /// New scope with the session ID set. No-op on an empty scope.
    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        match &self.context {
            Some(context) => Self::new(context.clone().with_session_id(session_id)),
            None => self.clone(),
        }
    }

    /// Propagate onto outbound headers. No-op on an empty scope.
    pub fn inject(&self, headers: &mut HeaderMap) {
        if let Some(context) = &self.context {
            context.inject(headers);
        }
    }

    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        self.context.as_ref().map(CorrelationContext::fields).unwrap_or_default()
    }

    /// Correlation ID safe to put in a log line.
    pub fn log_correlation_id(&self) -> String {
        sanitize_id(self.correlation_id())
    }
}

impl From<CorrelationContext> for RequestScope {
    fn from(context: CorrelationContext) -> Self {
        Self::new(context)
    }
}

impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestScope>().cloned().unwrap_or_default())
    }
}

/// Fresh UUID v4 identifier.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A well-formed identifier is a UUID, a 32-hex-digit trace ID, or a
/// 16-hex-digit span ID.
pub fn validate_id(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    if Uuid::parse_str(id).is_ok() {
        return true;
    }
    matches!(id.len(), 16 | 32) && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Strip everything outside `[A-Za-z0-9_-]`, then cap at
/// [`MAX_LOGGED_ID_LEN`] characters with a trailing `...`.
pub fn sanitize_id(id: &str) -> String {
    let mut sanitized: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if sanitized.len() > MAX_LOGGED_ID_LEN {
        sanitized.truncate(MAX_LOGGED_ID_LEN);
        sanitized.push_str("...");
    }
    sanitized
}

fn header(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert((*name).clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_correlation_id_priority() {
        let ctx = CorrelationContext::from_headers(&headers(&[
            (&CORRELATION_ID_HEADER, "corr-1"),
            (&REQUEST_ID_HEADER, "req-1"),
            (&TRACE_ID_HEADER, "trace-1"),
        ]));
        assert_eq!(ctx.correlation_id(), "corr-1");
        assert_eq!(ctx.request_id(), "req-1");
        assert_eq!(ctx.trace_id(), "trace-1");

        let ctx = CorrelationContext::from_headers(&headers(&[(&REQUEST_ID_HEADER, "req-only")]));
        assert_eq!(ctx.correlation_id(), "req-only");
        assert_eq!(ctx.request_id(), "req-only");

        let ctx = CorrelationContext::from_headers(&headers(&[(&TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736")]));
        assert_eq!(ctx.correlation_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(validate_id(ctx.request_id()));
    }

    #[test]
    fn test_generates_ids_without_headers() {
        let ctx = CorrelationContext::from_headers(&HeaderMap::new());
        assert!(validate_id(ctx.correlation_id()));
        assert!(validate_id(ctx.request_id()));
        assert_ne!(ctx.correlation_id(), ctx.request_id());
        assert_eq!(ctx.trace_id(), "");
        assert_eq!(ctx.span_id(), "");
    }

    #[test]
    fn test_inject_only_populated() {
        let ctx = CorrelationContext::new("corr", "req", "", "span-9");
        let out = ctx.to_headers();
        assert_eq!(out.get(&CORRELATION_ID_HEADER).unwrap(), "corr");
        assert_eq!(out.get(&REQUEST_ID_HEADER).unwrap(), "req");
        assert!(out.get(&TRACE_ID_HEADER).is_none());
        assert_eq!(out.get(&SPAN_ID_HEADER).unwrap(), "span-9");
    }

    #[test]
    fn test_empty_scope() {
        let scope = RequestScope::default();
        assert_eq!(scope.correlation_id(), "");
        assert_eq!(scope.user_id(), "");
        assert_eq!(scope.with_user_id("u-1"), scope);
        assert!(scope.fields().is_empty());

        let mut out = HeaderMap::new();
        scope.inject(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_setters_return_new_scope() {
        let scope = RequestScope::with_correlation_context("corr", "req", "trace", "span");
        let with_user = scope.with_user_id("user-7").with_session_id("sess-3");

        assert_eq!(scope.user_id(), "");
        assert_eq!(with_user.user_id(), "user-7");
        assert_eq!(with_user.session_id(), "sess-3");
        assert_eq!(with_user.correlation_id(), "corr");
    }

    #[test]
    fn test_fields_display_and_is_empty() {
        let ctx = CorrelationContext::new("corr", "req", "", "").with_user_id("bob@example");
        let fields = ctx.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["user_id"], "bobexample");

        assert!(ctx.to_string().starts_with("correlation_id=corr, request_id=req"));
        assert!(!ctx.is_empty());
        assert!(CorrelationContext::default().is_empty());
    }

    #[test]
    fn test_log_correlation_id_is_sanitized() {
        let mut map = HeaderMap::new();
        map.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("abc def;<drop>=1"));
        let scope = RequestScope::new(CorrelationContext::from_headers(&map));

        assert_eq!(scope.correlation_id(), "abc def;<drop>=1");
        assert_eq!(scope.log_correlation_id(), "abcdefdrop1");
        assert_eq!(RequestScope::default().log_correlation_id(), "");
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(validate_id("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert!(validate_id("00f067aa0ba902b7"));
        assert!(!validate_id(""));
        assert!(!validate_id("not-an-id"));
        assert!(!validate_id("00f067aa0ba902bz"));
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("abc@#$def-1_2"), "abcdef-1_2");
        assert_eq!(sanitize_id(""), "");

        let long = "a".repeat(70);
        let sanitized = sanitize_id(&long);
        assert_eq!(sanitized.len(), MAX_LOGGED_ID_LEN + 3);
        assert!(sanitized.ends_with("..."));
        assert_eq!(&sanitized[..MAX_LOGGED_ID_LEN], &long[..MAX_LOGGED_ID_LEN]);
    }
}
