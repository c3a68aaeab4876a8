//! Liveness reporting for broker connections.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

/// Something whose connection can be probed.
#[async_trait]
pub trait ConnectionHealth: Send + Sync {
    async fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Aggregate result of a set of named checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckStatus>,
}

impl HealthReport {
    /// Probe every check. Healthy only if all report open.
    pub async fn collect(checks: &[(&str, &dyn ConnectionHealth)]) -> Self {
        let mut results = BTreeMap::new();
        for (name, check) in checks {
            let status = if check.is_open().await {
                CheckStatus::Ok
            } else {
                CheckStatus::Error
            };
            results.insert(name.to_string(), status);
        }

        let status = if results.values().all(|s| *s == CheckStatus::Ok) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            checks: results,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
