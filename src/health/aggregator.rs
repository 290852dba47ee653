//! Concurrent health aggregation.
//!
//! # Responsibilities
//! - Hold the registry of named checks
//! - Run every check concurrently under one shared deadline
//! - Fold the per-check records into a [`ServiceHealth`] snapshot
//!
//! # Design Decisions
//! - Each check runs in its own spawned task, so a panic or a hang stays local
//! - A check that misses the deadline is abandoned, not joined; its task
//!   observes cancellation of the pass token and may finish on its own time
//! - The registry lock is only held to copy the check list, never across awaits

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::health::status::{DependencyHealth, ServiceHealth};
use crate::observability::metrics::MetricsRecorder;

/// Default deadline for one aggregation pass.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub type CheckFuture = Pin<Box<dyn Future<Output = Option<DependencyHealth>> + Send + 'static>>;

/// A named dependency probe.
///
/// The token is cancelled when the aggregation pass ends or its caller gives
/// up. Returning `None` is reported as unhealthy.
pub trait HealthCheck: Send + Sync + 'static {
    fn check(&self, cancel: CancellationToken) -> CheckFuture;
}

impl<F, Fut> HealthCheck for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<DependencyHealth>> + Send + 'static,
{
    fn check(&self, cancel: CancellationToken) -> CheckFuture {
        Box::pin(self(cancel))
    }
}

/// Registry of health checks for one service.
pub struct HealthChecker {
    service: String,
    checks: RwLock<BTreeMap<String, Arc<dyn HealthCheck>>>,
    timeout: RwLock<Duration>,
    metrics: Option<MetricsRecorder>,
}

impl HealthChecker {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            checks: RwLock::new(BTreeMap::new()),
            timeout: RwLock::new(DEFAULT_TIMEOUT),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Register a check, replacing any check with the same name.
    pub fn add_check(&self, name: impl Into<String>, check: impl HealthCheck) {
        let name = name.into();
        tracing::debug!(service = %self.service, check = %name, "Health check registered");
        self.checks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, Arc::new(check));
    }

    /// Remove a check. Returns whether it was registered.
    pub fn remove_check(&self, name: &str) -> bool {
        self.checks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.checks.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered check and build a snapshot.
    ///
    /// Never fails: timeouts, panics, cancellation, and missing results all
    /// become unhealthy records for the affected dependency.
    pub async fn check_health(&self, parent: &CancellationToken) -> ServiceHealth {
        let checks: Vec<(String, Arc<dyn HealthCheck>)> = self
            .checks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let timeout = self.timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let scope = parent.child_token();

        let pending = checks
            .into_iter()
            .map(|(name, check)| run_check(name, check, scope.clone(), deadline, timeout));
        let records = join_all(pending).await;

        // Releases abandoned checks.
        scope.cancel();

        if let Some(metrics) = &self.metrics {
            for (record, elapsed) in &records {
                metrics.record_health_check(&record.name, record.status, *elapsed);
            }
        }

        let snapshot = ServiceHealth::from_records(self.service.clone(), records.into_iter().map(|(record, _)| record));
        tracing::debug!(
            service = %self.service,
            status = %snapshot.status,
            total = snapshot.total_checks,
            unhealthy = snapshot.unhealthy,
            "Health aggregation complete"
        );
        snapshot
    }
}

async fn run_check(
    name: String,
    check: Arc<dyn HealthCheck>,
    scope: CancellationToken,
    deadline: tokio::time::Instant,
    timeout: Duration,
) -> (DependencyHealth, Duration) {
    let started = Instant::now();
    let token = scope.clone();
    let handle = tokio::spawn(async move { check.check(token).await });

    let record = tokio::select! {
        biased;
        joined = handle => match joined {
            Ok(Some(record)) => record,
            Ok(None) => DependencyHealth::unhealthy("health check returned no result"),
            Err(e) if e.is_panic() => {
                tracing::warn!(check = %name, "Health check panicked");
                DependencyHealth::unhealthy("health check panicked")
            }
            Err(_) => DependencyHealth::unhealthy("health check cancelled"),
        },
        _ = tokio::time::sleep_until(deadline) => {
            tracing::warn!(check = %name, timeout_ms = timeout.as_millis() as u64, "Health check timed out");
            DependencyHealth::unhealthy("health check timed out")
                .with_detail("timeout_ms", timeout.as_millis() as u64)
        }
        _ = scope.cancelled() => {
            tracing::warn!(check = %name, "Health check cancelled");
            DependencyHealth::unhealthy("health check cancelled")
        }
    };

    (record.with_name(name), started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::status::HealthStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed(status: HealthStatus) -> impl HealthCheck {
        move |_cancel: CancellationToken| async move { Some(DependencyHealth::new(status, "fixed")) }
    }

    #[tokio::test]
    async fn test_registry_operations() {
        let checker = HealthChecker::new("svc");
        assert!(checker.is_empty());
        assert_eq!(checker.timeout(), DEFAULT_TIMEOUT);

        checker.add_check("db", fixed(HealthStatus::Healthy));
        checker.add_check("cache", fixed(HealthStatus::Healthy));
        assert_eq!(checker.check_names(), vec!["cache".to_string(), "db".to_string()]);

        assert!(checker.remove_check("db"));
        assert!(!checker.remove_check("db"));
        assert_eq!(checker.len(), 1);

        checker.set_timeout(Duration::from_secs(2));
        assert_eq!(checker.timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_aggregates_worst_status() {
        let checker = HealthChecker::new("svc");
        checker.add_check("a", fixed(HealthStatus::Healthy));
        checker.add_check("b", fixed(HealthStatus::Degraded));

        let token = CancellationToken::new();
        let snapshot = checker.check_health(&token).await;
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.dependencies["b"].name, "b");

        checker.add_check("c", fixed(HealthStatus::Unhealthy));
        let snapshot = checker.check_health(&token).await;
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.total_checks, 3);
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let checker = HealthChecker::new("svc");
        checker.add_check("a", fixed(HealthStatus::Healthy));
        checker.add_check("b", fixed(HealthStatus::Healthy));

        let snapshot = checker.check_health(&CancellationToken::new()).await;
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.healthy, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_times_out() {
        let checker = HealthChecker::new("svc");
        checker.set_timeout(Duration::from_millis(100));
        checker.add_check("fast", fixed(HealthStatus::Healthy));
        checker.add_check("hung", |_cancel: CancellationToken| async move {
            std::future::pending::<()>().await;
            Some(DependencyHealth::healthy("never"))
        });

        let started = tokio::time::Instant::now();
        let snapshot = checker.check_health(&CancellationToken::new()).await;

        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(snapshot.dependencies["fast"].status, HealthStatus::Healthy);
        let hung = &snapshot.dependencies["hung"];
        assert_eq!(hung.status, HealthStatus::Unhealthy);
        assert_eq!(hung.message, "health check timed out");
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_check_observes_cancellation() {
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = observed.clone();

        let checker = HealthChecker::new("svc");
        checker.set_timeout(Duration::from_millis(50));
        checker.add_check("slow", move |cancel: CancellationToken| {
            let seen = seen.clone();
            async move {
                cancel.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
                None::<DependencyHealth>
            }
        });

        checker.check_health(&CancellationToken::new()).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_result_and_panic_are_unhealthy() {
        let checker = HealthChecker::new("svc");
        checker.add_check("empty", |_cancel: CancellationToken| async move { None::<DependencyHealth> });
        checker.add_check("boom", |_cancel: CancellationToken| async move {
            if true {
                panic!("probe exploded");
            }
            Some(DependencyHealth::healthy("unreachable"))
        });
        checker.add_check("ok", fixed(HealthStatus::Healthy));

        let snapshot = checker.check_health(&CancellationToken::new()).await;
        assert_eq!(snapshot.dependencies["empty"].message, "health check returned no result");
        assert_eq!(snapshot.dependencies["boom"].message, "health check panicked");
        assert_eq!(snapshot.dependencies["ok"].status, HealthStatus::Healthy);
        assert_eq!(snapshot.unhealthy, 2);
    }

    #[tokio::test]
    async fn test_cancelled_parent() {
        let checker = HealthChecker::new("svc");
        checker.add_check("wait", |cancel: CancellationToken| async move {
            cancel.cancelled().await;
            std::future::pending::<()>().await;
            None::<DependencyHealth>
        });

        let parent = CancellationToken::new();
        parent.cancel();
        let snapshot = checker.check_health(&parent).await;
        assert_eq!(snapshot.dependencies["wait"].message, "health check cancelled");
    }

    #[tokio::test]
    async fn test_records_metrics() {
        let (recorder, handle) = MetricsRecorder::prometheus("svc").unwrap();
        let checker = HealthChecker::new("svc").with_metrics(recorder);
        checker.add_check("db", fixed(HealthStatus::Degraded));

        checker.check_health(&CancellationToken::new()).await;
        let output = handle.render();
        assert!(output.contains("health_check_status"));
        assert!(output.contains("dependency=\"db\""));
    }
}
