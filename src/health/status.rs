//! Health verdicts and the aggregated snapshot served on the status endpoint.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a single dependency or of the service as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Gauge encoding: 0 unhealthy, 1 degraded, 2 healthy.
    pub fn as_gauge(&self) -> f64 {
        match self {
            HealthStatus::Unhealthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Healthy => 2.0,
        }
    }

    /// Degraded services still answer 200; only unhealthy maps to 503.
    pub fn http_status(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of two verdicts. Unhealthy dominates degraded dominates healthy.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one dependency check.
///
/// Checks construct records with [`DependencyHealth::healthy`] and friends;
/// the aggregator stamps the registered name onto whatever the check returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyHealth {
    #[serde(default)]
    pub name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl DependencyHealth {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Immutable result of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub dependencies: BTreeMap<String, DependencyHealth>,
    pub total_checks: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

impl ServiceHealth {
    /// Fold dependency records into a snapshot. No records means healthy.
    pub fn from_records(service: impl Into<String>, records: impl IntoIterator<Item = DependencyHealth>) -> Self {
        let mut snapshot = Self {
            service: service.into(),
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            dependencies: BTreeMap::new(),
            total_checks: 0,
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
        };

        for record in records {
            snapshot.status = snapshot.status.worst(record.status);
            snapshot.dependencies.insert(record.name.clone(), record);
        }

        for record in snapshot.dependencies.values() {
            match record.status {
                HealthStatus::Healthy => snapshot.healthy += 1,
                HealthStatus::Degraded => snapshot.degraded += 1,
                HealthStatus::Unhealthy => snapshot.unhealthy += 1,
            }
        }
        snapshot.total_checks = snapshot.dependencies.len();
        snapshot
    }

    pub fn http_status(&self) -> StatusCode {
        self.status.http_status()
    }
}

impl IntoResponse for ServiceHealth {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self)).into_response()
    }
}
