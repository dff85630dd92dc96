//! Rate-limited fetch pipeline and the fetchers it drives
//!
//! [`FetchPipeline`] wraps every outbound call with a per-class token bucket,
//! a fixed timeout, back-off retry and a per-class circuit breaker.
//! [`Fetcher`] is the seam between the pipeline and the transport; the
//! production implementation routes API requests to [`HttpFetcher`] and page
//! navigations to [`BrowserFetcher`].

pub mod browser_fetcher;
pub mod circuit_breaker;
pub mod http_client;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod target;

use async_trait::async_trait;

pub use browser_fetcher::BrowserFetcher;
pub use circuit_breaker::{BreakerDecision, BreakerSnapshot, CircuitBreaker, CircuitState, HalfOpenLease};
pub use http_client::HttpFetcher;
pub use pipeline::FetchPipeline;
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use retry::{AttemptError, RetryPolicy, parse_retry_after};
pub use target::TargetClass;

/// One outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub class: TargetClass,
    pub url: String,
    /// Egress endpoint picked for this call, `None` in degraded mode
    pub proxy: Option<String>,
}

/// Performs a single fetch attempt and classifies its failure
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AttemptError>;
}

/// Routes API calls over HTTP and navigations through the browser pool
///
/// Without a browser pool, navigations fall back to plain HTTP.
pub struct PlatformFetcher {
    http: HttpFetcher,
    browser: Option<BrowserFetcher>,
}

impl PlatformFetcher {
    #[must_use]
    pub fn new(http: HttpFetcher, browser: Option<BrowserFetcher>) -> Self {
        Self { http, browser }
    }
}

#[async_trait]
impl Fetcher for PlatformFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AttemptError> {
        match (request.class, &self.browser) {
            (TargetClass::Navigation, Some(browser)) => browser.fetch(&request.url).await,
            _ => self.http.get(&request.url, request.proxy.as_deref()).await,
        }
    }
}
