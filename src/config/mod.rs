//! Configuration module for the scraper
//!
//! This module provides the `ScraperConfig` struct, its fluent builder, and
//! loading from file and environment with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod loader;
pub mod types;

// Re-exports for public API
pub use builder::ScraperConfigBuilder;
pub use loader::CONFIG_PATH_ENV;
pub use types::{
    BreakerSettings, BrowserPoolSettings, BucketSettings, CacheSettings, EndpointSettings,
    FetchSettings, JobSettings, MetricsSettings, PredictionSettings, ProxySettings, RetrySettings,
    ScraperConfig, StorageSettings, WebhookSettings,
};
