//! Fluent builder for `ScraperConfig`
//!
//! Starts from the defaults, lets callers override the handful of values that
//! usually differ between deployments, and validates on `build()`.

use anyhow::Result;
use std::path::PathBuf;

use super::types::{
    BreakerSettings, BucketSettings, PredictionSettings, RetrySettings, ScraperConfig,
    WebhookSettings,
};
use crate::scoring::ScoringWeights;

#[derive(Debug, Clone, Default)]
pub struct ScraperConfigBuilder {
    config: ScraperConfig,
}

impl ScraperConfig {
    /// Create a builder for configuring a `ScraperConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> ScraperConfigBuilder {
        ScraperConfigBuilder::default()
    }
}

impl ScraperConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from a file)
    #[must_use]
    pub fn from_config(config: ScraperConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn proxy_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.proxy.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn proxy_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.proxy.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn browsers(mut self, browsers: usize, pages_per_browser: usize) -> Self {
        self.config.browser_pool.browsers = browsers;
        self.config.browser_pool.pages_per_browser = pages_per_browser;
        self
    }

    #[must_use]
    pub fn checkout_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.browser_pool.checkout_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.browser_pool.headless = headless;
        self
    }

    #[must_use]
    pub fn api_bucket(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.config.fetch.api_bucket = BucketSettings::new(capacity, refill_per_sec);
        self
    }

    #[must_use]
    pub fn navigation_bucket(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.config.fetch.navigation_bucket = BucketSettings::new(capacity, refill_per_sec);
        self
    }

    #[must_use]
    pub fn call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.fetch.call_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.fetch.retry = retry;
        self
    }

    #[must_use]
    pub fn breaker(mut self, breaker: BreakerSettings) -> Self {
        self.config.fetch.breaker = breaker;
        self
    }

    #[must_use]
    pub fn l1_capacity(mut self, capacity: usize) -> Self {
        self.config.cache.l1_capacity = capacity;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize, max_in_flight: usize) -> Self {
        self.config.jobs.workers = workers;
        self.config.jobs.max_in_flight = max_in_flight;
        self
    }

    #[must_use]
    pub fn job_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.config.jobs.default_max_retries = max_retries;
        self.config.jobs.retry_delay_ms = retry_delay_ms;
        self
    }

    #[must_use]
    pub fn job_retention(mut self, retention_secs: u64, prune_interval_secs: u64) -> Self {
        self.config.jobs.retention_secs = retention_secs;
        self.config.jobs.prune_interval_secs = prune_interval_secs;
        self
    }

    #[must_use]
    pub fn scoring(mut self, weights: ScoringWeights) -> Self {
        self.config.scoring = weights;
        self
    }

    #[must_use]
    pub fn metrics_interval_secs(mut self, secs: u64) -> Self {
        self.config.metrics.interval_secs = secs;
        self
    }

    #[must_use]
    pub fn influx_write_url(mut self, url: impl Into<String>) -> Self {
        self.config.metrics.influx_write_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn prediction_url(mut self, url: impl Into<String>) -> Self {
        self.config.prediction = Some(PredictionSettings {
            url: url.into(),
            timeout_ms: 5_000,
            api_key: None,
        });
        self
    }

    #[must_use]
    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.config.webhook = Some(WebhookSettings {
            url: url.into(),
            timeout_ms: 10_000,
        });
        self
    }

    #[must_use]
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage.database_path = Some(path.into());
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn build(self) -> Result<ScraperConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
