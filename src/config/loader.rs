//! Loading and validating `ScraperConfig`
//!
//! Sources, lowest precedence first: defaults, an optional JSON file, then
//! `TRENDSCRAPE_*` environment variables.

use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use tracing::{debug, info};

use super::types::{BucketSettings, ScraperConfig};

/// Environment variable pointing at the JSON config file
pub const CONFIG_PATH_ENV: &str = "TRENDSCRAPE_CONFIG";

impl ScraperConfig {
    /// Read a JSON config file; missing sections fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, then `$TRENDSCRAPE_CONFIG` (if set), then env overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRENDSCRAPE_*` overrides read through `lookup`
    ///
    /// Taking a lookup function keeps tests free of process-global env mutation.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRENDSCRAPE_PROXIES") {
            self.proxy.endpoints = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            debug!("proxy endpoints overridden from environment ({})", self.proxy.endpoints.len());
        }
        if let Some(v) = lookup("TRENDSCRAPE_BROWSERS") {
            self.browser_pool.browsers = parse_env("TRENDSCRAPE_BROWSERS", &v)?;
        }
        if let Some(v) = lookup("TRENDSCRAPE_PAGES_PER_BROWSER") {
            self.browser_pool.pages_per_browser = parse_env("TRENDSCRAPE_PAGES_PER_BROWSER", &v)?;
        }
        if let Some(v) = lookup("TRENDSCRAPE_HEADLESS") {
            self.browser_pool.headless = parse_env("TRENDSCRAPE_HEADLESS", &v)?;
        }
        if let Some(v) = lookup("TRENDSCRAPE_WORKERS") {
            self.jobs.workers = parse_env("TRENDSCRAPE_WORKERS", &v)?;
        }
        if let Some(v) = lookup("TRENDSCRAPE_MAX_IN_FLIGHT") {
            self.jobs.max_in_flight = parse_env("TRENDSCRAPE_MAX_IN_FLIGHT", &v)?;
        }
        if let Some(v) = lookup("TRENDSCRAPE_DATABASE") {
            self.storage.database_path = Some(v.into());
        }
        if let Some(v) = lookup("TRENDSCRAPE_INFLUX_URL") {
            self.metrics.influx_write_url = Some(v);
        }
        if let Some(v) = lookup("TRENDSCRAPE_INFLUX_TOKEN") {
            self.metrics.influx_token = Some(v);
        }
        Ok(())
    }

    /// Reject configurations that would deadlock or divide by zero
    pub fn validate(&self) -> Result<()> {
        if self.browser_pool.browsers == 0 || self.browser_pool.pages_per_browser == 0 {
            bail!("browser_pool.browsers and browser_pool.pages_per_browser must be at least 1");
        }
        if self.jobs.workers == 0 || self.jobs.max_in_flight == 0 {
            bail!("jobs.workers and jobs.max_in_flight must be at least 1");
        }
        validate_bucket("fetch.api_bucket", &self.fetch.api_bucket)?;
        validate_bucket("fetch.navigation_bucket", &self.fetch.navigation_bucket)?;
        if self.fetch.retry.max_attempts == 0 {
            bail!("fetch.retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.fetch.retry.jitter) {
            bail!("fetch.retry.jitter must be within [0, 1]");
        }
        if self.fetch.retry.multiplier < 1.0 {
            bail!("fetch.retry.multiplier must be >= 1.0");
        }
        let breaker = &self.fetch.breaker;
        if breaker.failure_threshold == 0 {
            bail!("fetch.breaker.failure_threshold must be at least 1");
        }
        if !(0.0..=1.0).contains(&breaker.failure_rate) || breaker.failure_rate == 0.0 {
            bail!("fetch.breaker.failure_rate must be within (0, 1]");
        }
        if self.cache.l1_capacity == 0 {
            bail!("cache.l1_capacity must be at least 1");
        }
        if self.cache.namespace.contains(':') || self.cache.namespace.is_empty() {
            bail!("cache.namespace must be non-empty and must not contain ':'");
        }
        for (name, value) in [
            ("proxy.check_interval_secs", self.proxy.check_interval_secs),
            ("proxy.probe_timeout_ms", self.proxy.probe_timeout_ms),
            ("browser_pool.checkout_timeout_ms", self.browser_pool.checkout_timeout_ms),
            ("browser_pool.monitor_interval_secs", self.browser_pool.monitor_interval_secs),
            ("fetch.call_timeout_ms", self.fetch.call_timeout_ms),
            ("fetch.breaker.window_secs", self.fetch.breaker.window_secs),
            ("fetch.breaker.cooldown_secs", self.fetch.breaker.cooldown_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("jobs.prune_interval_secs", self.jobs.prune_interval_secs),
            ("metrics.interval_secs", self.metrics.interval_secs),
        ] {
            if value == 0 {
                bail!("{name} must be at least 1");
            }
        }
        self.scoring
            .validate()
            .map_err(|e| anyhow!("scoring: {e}"))?;
        Ok(())
    }
}

fn validate_bucket(name: &str, bucket: &BucketSettings) -> Result<()> {
    if bucket.capacity == 0 {
        bail!("{name}.capacity must be at least 1");
    }
    if !(bucket.refill_per_sec > 0.0) {
        bail!("{name}.refill_per_sec must be positive");
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow!("{key}={value:?} is invalid: {e}"))
}
