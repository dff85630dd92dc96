//! HTTP fetcher with one `reqwest` client per proxy address

use dashmap::DashMap;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::retry::{AttemptError, parse_retry_after};
use crate::proxy_registry::ProxyRegistry;

/// Direct (no proxy) client key
const DIRECT: &str = "";

pub struct HttpFetcher {
    clients: DashMap<String, reqwest::Client>,
    user_agent: String,
    timeout: Duration,
    proxies: Option<Arc<ProxyRegistry>>,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(user_agent: impl Into<String>, timeout: Duration, proxies: Option<Arc<ProxyRegistry>>) -> Self {
        Self {
            clients: DashMap::new(),
            user_agent: user_agent.into(),
            timeout,
            proxies,
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, AttemptError> {
        let key = proxy.unwrap_or(DIRECT);
        if let Some(client) = self.clients.get(key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout);
        if let Some(address) = proxy {
            let proxy = reqwest::Proxy::all(address)
                .map_err(|e| AttemptError::permanent(format!("invalid proxy {address}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AttemptError::permanent(format!("failed to build HTTP client: {e}")))?;
        self.clients.insert(key.to_string(), client.clone());
        Ok(client)
    }

    /// GET `url`, optionally through `proxy`, and classify the outcome
    pub async fn get(&self, url: &str, proxy: Option<&str>) -> Result<String, AttemptError> {
        let client = self.client_for(proxy)?;
        let response = client
            .get(url)
            .header(ACCEPT, "application/json, text/html;q=0.9, */*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e, proxy))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(%url, ?retry_after, "remote returned 429");
            return Err(AttemptError::rate_limited(retry_after));
        }
        if status.is_server_error() {
            return Err(AttemptError::transient(format!("{url} returned {status}")));
        }
        if status.is_client_error() {
            return Err(AttemptError::permanent(format!("{url} returned {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| AttemptError::transient(format!("reading body of {url} failed: {e}")))
    }

    fn classify_send_error(&self, err: &reqwest::Error, proxy: Option<&str>) -> AttemptError {
        if err.is_connect()
            && let (Some(address), Some(registry)) = (proxy, &self.proxies)
        {
            registry.mark_unhealthy(address);
        }
        if err.is_builder() {
            return AttemptError::permanent(err.to_string());
        }
        AttemptError::transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new("test-agent", Duration::from_secs(5), None)
    }

    #[tokio::test]
    async fn ok_body_is_returned() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/item")
            .match_header("user-agent", "test-agent")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let body = fetcher()
            .get(&format!("{}/api/item", server.url()), None)
            .await
            .expect("200 response");
        assert_eq!(body, r#"{"ok":true}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/item")
            .with_status(429)
            .with_header("retry-after", "3")
            .create_async()
            .await;

        match fetcher().get(&format!("{}/api/item", server.url()), None).await {
            Err(AttemptError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_classes_map_to_attempt_errors() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("GET", "/down").with_status(503).create_async().await;
        let _b = server.mock("GET", "/gone").with_status(404).create_async().await;
        let f = fetcher();

        assert!(matches!(
            f.get(&format!("{}/down", server.url()), None).await,
            Err(AttemptError::Transient(_))
        ));
        assert!(matches!(
            f.get(&format!("{}/gone", server.url()), None).await,
            Err(AttemptError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn dead_proxy_is_marked_unhealthy() {
        let metrics = Arc::new(crate::metrics::ScraperMetrics::new());
        let registry = Arc::new(ProxyRegistry::new(5, metrics));
        registry.register("http://127.0.0.1:9").expect("register");
        let f = HttpFetcher::new("ua", Duration::from_secs(2), Some(registry.clone()));

        let result = f.get("http://example.com/", Some("http://127.0.0.1:9")).await;
        assert!(matches!(result, Err(AttemptError::Transient(_))));
        assert_eq!(registry.healthy_count(), 0);
    }
}
