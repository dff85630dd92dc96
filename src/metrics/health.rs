//! Aggregated health status

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::browser_pool::PoolStats;
use crate::fetch::TargetClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Raw component state gathered by the supervisor
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    pub proxies_healthy: usize,
    pub proxies_total: usize,
    /// `None` when the process runs without a browser pool
    pub pool: Option<PoolStats>,
    pub open_circuits: Vec<TargetClass>,
    pub queue_depth: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub proxies_healthy: usize,
    pub proxies_total: usize,
    pub pool: Option<PoolStats>,
    pub open_circuits: Vec<TargetClass>,
    pub queue_depth: usize,
    pub in_flight: usize,
    /// Human-readable reasons for a non-healthy status
    pub issues: Vec<String>,
}

impl HealthReport {
    /// Fold component state into a single status
    ///
    /// Unhealthy: every target class is short-circuited, or the pool has no
    /// live browser. Degraded: any open circuit, or registered proxies with
    /// none healthy (fetches run without a proxy).
    #[must_use]
    pub fn assess(inputs: HealthInputs, checked_at: DateTime<Utc>) -> Self {
        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        if inputs.proxies_total > 0 && inputs.proxies_healthy == 0 {
            status = status.max(HealthStatus::Degraded);
            issues.push(format!("0/{} proxies healthy", inputs.proxies_total));
        }

        if !inputs.open_circuits.is_empty() {
            let all_open = TargetClass::ALL.iter().all(|c| inputs.open_circuits.contains(c));
            status = status.max(if all_open {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            });
            let names: Vec<&str> = inputs.open_circuits.iter().map(TargetClass::as_str).collect();
            issues.push(format!("circuit open: {}", names.join(", ")));
        }

        if let Some(pool) = &inputs.pool
            && pool.capacity > 0
            && pool.browsers == 0
        {
            status = HealthStatus::Unhealthy;
            issues.push("no live browser instances".to_string());
        }

        Self {
            status,
            checked_at,
            proxies_healthy: inputs.proxies_healthy,
            proxies_total: inputs.proxies_total,
            pool: inputs.pool,
            open_circuits: inputs.open_circuits,
            queue_depth: inputs.queue_depth,
            in_flight: inputs.in_flight,
            issues,
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
