//! Rate-limited crawling and analytics engine for short-video platforms
//!
//! Components, leaf to root:
//!
//! - [`proxy_registry`]: health-checked egress endpoints
//! - [`browser_pool`]: fixed pool of headless browsers with pre-warmed pages
//! - [`fetch`]: token-bucket limiter, back-off retry and circuit breaker around every call
//! - [`cache`]: L1/L2 cache with single-flight fetches and tag invalidation
//! - [`jobs`]: durable priority queue and bounded worker pool
//! - [`scoring`]: pure scoring functions over raw snapshots
//! - [`metrics`]: counters, health report and the periodic reporter
//!
//! [`Supervisor`] owns and wires all of them.

pub mod browser_pool;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod parse;
pub mod proxy_registry;
pub mod scoring;
pub mod scrape;
pub mod store;
pub mod supervisor;
pub mod utils;

pub use cache::{CacheKey, CacheSource, MultiTierCache};
pub use config::ScraperConfig;
pub use error::{ErrorKind, ScrapeError, ScrapeResult};
pub use events::{EventBus, ScrapeEvent};
pub use jobs::{JobOptions, JobRequest, JobStatus, ScrapeJob, TargetType};
pub use metrics::{HealthReport, HealthStatus, ScraperMetrics};
pub use scoring::ScoringEngine;
pub use supervisor::{Supervisor, SupervisorDeps};
