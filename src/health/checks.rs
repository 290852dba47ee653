//! Ready-made dependency checks.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::health::aggregator::HealthCheck;
use crate::health::status::DependencyHealth;

/// Probe `url` with a GET.
///
/// 2xx is healthy, any other status is degraded, and a transport error or
/// timeout is unhealthy.
pub fn http_check(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> impl HealthCheck {
    let url = url.into();
    move |cancel: CancellationToken| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let started = Instant::now();
            let result = tokio::select! {
                result = client.get(&url).timeout(timeout).send() => result,
                _ = cancel.cancelled() => return Some(DependencyHealth::unhealthy("health check cancelled")),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            let record = match result {
                Ok(response) => {
                    let code = response.status();
                    let record = if code.is_success() {
                        DependencyHealth::healthy(format!("service responded with status {}", code.as_u16()))
                    } else {
                        DependencyHealth::degraded(format!("service responded with status {}", code.as_u16()))
                    };
                    record.with_detail("status_code", code.as_u16())
                }
                Err(e) if e.is_timeout() => {
                    DependencyHealth::unhealthy(format!("request timed out after {}ms", timeout.as_millis()))
                }
                Err(e) => DependencyHealth::unhealthy(format!("request failed: {}", e)),
            };
            Some(record.with_detail("url", url).with_detail("latency_ms", latency_ms))
        }
    }
}

/// Wrap a pass/fail probe. `Ok` is healthy, `Err` is unhealthy with the error as message.
pub fn probe_check<F, Fut, E>(probe: F) -> impl HealthCheck
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    move |cancel: CancellationToken| {
        let pending = probe(cancel);
        async move {
            Some(match pending.await {
                Ok(()) => DependencyHealth::healthy("check passed"),
                Err(e) => DependencyHealth::unhealthy(e.to_string()),
            })
        }
    }
}

/// Always report a clone of `record`, with a fresh timestamp.
pub fn static_check(record: DependencyHealth) -> impl HealthCheck {
    move |_cancel: CancellationToken| {
        let mut record = record.clone();
        record.timestamp = chrono::Utc::now();
        async move { Some(record) }
    }
}
