//! Guarded outbound HTTP client.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::error::CallError;
use crate::observability::correlation::RequestScope;
use crate::observability::metrics::MetricsRecorder;
use crate::resilience::{BreakerRegistry, Retry, RetryPolicy};

/// HTTP client whose calls go through retry (outer) and the dependency's
/// circuit breaker (inner).
///
/// Each attempt is one breaker execution, so an open breaker stops the retry
/// loop on the next attempt instead of hammering the dependency.
#[derive(Clone)]
pub struct OutboundClient {
    http: reqwest::Client,
    breakers: Arc<BreakerRegistry>,
    policy: Arc<RetryPolicy>,
    metrics: Option<MetricsRecorder>,
}

impl OutboundClient {
    pub fn new(http: reqwest::Client, breakers: Arc<BreakerRegistry>, policy: RetryPolicy) -> Self {
        Self {
            http,
            breakers,
            policy: Arc::new(policy),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub async fn get(
        &self,
        dependency: &str,
        url: &str,
        scope: &RequestScope,
        cancel: &CancellationToken,
    ) -> Result<Response, CallError> {
        self.send(dependency, Method::GET, url, None, scope, cancel).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        dependency: &str,
        url: &str,
        body: &B,
        scope: &RequestScope,
        cancel: &CancellationToken,
    ) -> Result<Response, CallError> {
        let body = serde_json::to_vec(body)?;
        self.send(dependency, Method::POST, url, Some(body), scope, cancel).await
    }

    async fn send(
        &self,
        dependency: &str,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        scope: &RequestScope,
        cancel: &CancellationToken,
    ) -> Result<Response, CallError> {
        let url = Url::parse(url).map_err(|source| CallError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let mut headers = HeaderMap::new();
        scope.inject(&mut headers);
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let breaker = self.breakers.get(dependency);
        let retry = match &self.metrics {
            Some(metrics) => Retry::shared(self.policy.clone()).with_metrics(metrics.clone(), dependency, method.as_str()),
            None => Retry::shared(self.policy.clone()),
        };

        tracing::debug!(
            dependency = %dependency,
            method = %method,
            url = %url,
            correlation_id = %scope.log_correlation_id(),
            "Outbound call"
        );

        let result = retry
            .run(cancel, || {
                let mut request = self.http.request(method.clone(), url.clone()).headers(headers.clone());
                if let Some(body) = &body {
                    request = request.body(body.clone());
                }
                let breaker = breaker.clone();
                let metrics = self.metrics.clone();
                let dependency = dependency.to_string();
                let method = method.clone();

                async move {
                    let started = Instant::now();
                    let outcome = breaker
                        .execute_async(async {
                            match request.send().await {
                                Ok(response) if response.status().is_success() => Ok(response),
                                Ok(response) => Err(CallError::Status {
                                    dependency: dependency.clone(),
                                    status: response.status().as_u16(),
                                }),
                                Err(source) => Err(CallError::Transport {
                                    dependency: dependency.clone(),
                                    source,
                                }),
                            }
                        })
                        .await
                        .map_err(CallError::from);

                    if let Some(metrics) = &metrics {
                        let status = match &outcome {
                            Ok(_) => "success",
                            Err(e) => e.metric_status(),
                        };
                        metrics.record_service_call(&dependency, method.as_str(), status, started.elapsed());
                    }
                    outcome
                }
            })
            .await;

        result.map_err(|e| {
            let error = CallError::from_retry(dependency, e);
            tracing::warn!(dependency = %dependency, error = %error, "Outbound call failed");
            error
        })
    }
}
