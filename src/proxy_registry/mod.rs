//! Proxy Health Registry
//!
//! Tracks egress endpoints, health-checks them on an interval and evicts the
//! ones that keep failing. Selection is round-robin over healthy endpoints.
//! When nothing is healthy callers fetch without a proxy; that degraded mode
//! is logged and counted, never treated as fatal.

pub mod probe;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use probe::{HttpProxyProbe, ProxyProbe};

use crate::error::{ErrorKind, ScrapeError, ScrapeResult};
use crate::metrics::ScraperMetrics;

/// One egress endpoint and its health record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEndpoint {
    pub address: String,
    pub healthy: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ProxyEndpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            healthy: true,
            last_checked_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Registry of proxy endpoints; all mutation happens behind its own lock
pub struct ProxyRegistry {
    endpoints: RwLock<Vec<ProxyEndpoint>>,
    cursor: AtomicUsize,
    failure_threshold: u32,
    metrics: Arc<ScraperMetrics>,
}

impl ProxyRegistry {
    #[must_use]
    pub fn new(failure_threshold: u32, metrics: Arc<ScraperMetrics>) -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            failure_threshold: failure_threshold.max(1),
            metrics,
        }
    }

    /// Add an endpoint; re-registering a known address is a no-op
    ///
    /// # Errors
    ///
    /// `Config` when the address is not a URL with a host.
    pub fn register(&self, address: &str) -> ScrapeResult<()> {
        let parsed = url::Url::parse(address)
            .map_err(|e| ScrapeError::Config(format!("invalid proxy address {address}: {e}")))?;
        if parsed.host_str().is_none() {
            return Err(ScrapeError::Config(format!(
                "proxy address {address} has no host"
            )));
        }

        let mut endpoints = self.endpoints.write();
        if endpoints.iter().any(|e| e.address == address) {
            return Ok(());
        }
        endpoints.push(ProxyEndpoint::new(address.to_string()));
        info!(proxy = %redact(address), total = endpoints.len(), "registered proxy endpoint");
        Ok(())
    }

    /// Record a failure observed outside the health loop (e.g. a connect error)
    ///
    /// The endpoint stops being picked until a probe succeeds, and is evicted
    /// once it reaches the failure threshold.
    pub fn mark_unhealthy(&self, address: &str) {
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.address == address) {
            endpoint.healthy = false;
            endpoint.consecutive_failures += 1;
            debug!(
                proxy = %redact(address),
                failures = endpoint.consecutive_failures,
                "proxy marked unhealthy"
            );
        }
        self.evict_failed(&mut endpoints);
    }

    fn apply_probe_result(&self, address: &str, ok: bool) {
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.address == address) {
            endpoint.last_checked_at = Some(Utc::now());
            if ok {
                if !endpoint.healthy {
                    info!(proxy = %redact(address), "proxy recovered");
                }
                endpoint.healthy = true;
                endpoint.consecutive_failures = 0;
            } else {
                endpoint.healthy = false;
                endpoint.consecutive_failures += 1;
            }
        }
        self.evict_failed(&mut endpoints);
    }

    fn evict_failed(&self, endpoints: &mut Vec<ProxyEndpoint>) {
        let threshold = self.failure_threshold;
        endpoints.retain(|e| {
            let keep = e.consecutive_failures < threshold;
            if !keep {
                warn!(
                    proxy = %redact(&e.address),
                    failures = e.consecutive_failures,
                    "evicting proxy endpoint"
                );
            }
            keep
        });
    }

    /// Round-robin pick among healthy endpoints
    ///
    /// Returns `None` when no endpoint is healthy; the caller proceeds without
    /// a proxy and the capacity warning is logged here.
    pub fn pick_healthy(&self) -> Option<String> {
        let endpoints = self.endpoints.read();
        let healthy: Vec<&ProxyEndpoint> = endpoints.iter().filter(|e| e.healthy).collect();
        if healthy.is_empty() {
            drop(endpoints);
            warn!("no healthy proxy endpoint, fetching without proxy");
            self.metrics.record_error(ErrorKind::ResourceExhausted);
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
        let address = healthy[idx].address.clone();
        self.metrics.increment_proxy_rotation();
        Some(address)
    }

    /// Probe every endpoint once, concurrently, and apply the results
    pub async fn check_all(&self, probe: &dyn ProxyProbe) {
        let addresses: Vec<String> = self
            .endpoints
            .read()
            .iter()
            .map(|e| e.address.clone())
            .collect();
        if addresses.is_empty() {
            return;
        }

        let results = futures::future::join_all(addresses.iter().map(|address| async move {
            let outcome = probe.probe(address).await;
            (address, outcome)
        }))
        .await;

        for (address, outcome) in results {
            if let Err(e) = &outcome {
                debug!(proxy = %redact(address), "proxy probe failed: {e:#}");
            }
            self.apply_probe_result(address, outcome.is_ok());
        }

        debug!(
            healthy = self.healthy_count(),
            total = self.len(),
            "proxy health check finished"
        );
    }

    /// Start the periodic health-check loop; it exits when `cancel` fires
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        probe: Arc<dyn ProxyProbe>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => registry.check_all(probe.as_ref()).await,
                }
            }
            debug!("proxy health loop stopped");
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ProxyEndpoint> {
        self.endpoints.read().clone()
    }

    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.endpoints.read().iter().filter(|e| e.healthy).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Strip credentials from a proxy URL before it reaches the logs
fn redact(address: &str) -> String {
    match url::Url::parse(address) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("***");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => address.to_string(),
    }
}
