//! Page navigations through the browser pool

use std::sync::Arc;

use super::retry::AttemptError;
use crate::browser_pool::BrowserPool;

pub struct BrowserFetcher {
    pool: Arc<BrowserPool>,
}

impl BrowserFetcher {
    #[must_use]
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self { pool }
    }

    /// Check out a page, navigate, and return the rendered document
    ///
    /// The lease is dropped on every path, returning the page to the pool.
    /// Pool errors (`ResourceExhausted`, `StaleResource`) are surfaced as-is.
    pub async fn fetch(&self, url: &str) -> Result<String, AttemptError> {
        let lease = self.pool.checkout().await?;
        let outcome = lease.navigate(url).await?;
        outcome.map_err(|e| AttemptError::transient(format!("{e:#}")))
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<BrowserPool> {
        &self.pool
    }
}
