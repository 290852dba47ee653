//! Per-dependency breaker registry.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics::MetricsRecorder;
use crate::resilience::circuit_breaker::{BreakerStats, CircuitBreaker};

/// Lazily creates one [`CircuitBreaker`] per dependency name and keeps it for
/// the life of the process.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    metrics: Option<MetricsRecorder>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Breaker for `dependency`, created on first use.
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.value().clone();
        }

        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(dependency = %dependency, "Creating circuit breaker");
                let breaker = CircuitBreaker::new(dependency, self.config.clone());
                let breaker = match &self.metrics {
                    Some(metrics) => breaker.with_metrics(metrics.clone()),
                    None => breaker,
                };
                Arc::new(breaker)
            })
            .value()
            .clone()
    }

    /// Existing breaker for `dependency`, without creating one.
    pub fn find(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| b.value().clone())
    }

    /// Stats for every breaker, sorted by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
