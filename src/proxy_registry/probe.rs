//! Health probes issued through a proxy endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Issues one lightweight request through a proxy and reports whether it worked
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<()>;
}

/// Probe that fetches a small URL (a `204` endpoint by default) through the proxy
#[derive(Debug, Clone)]
pub struct HttpProxyProbe {
    probe_url: String,
    timeout: Duration,
}

impl HttpProxyProbe {
    #[must_use]
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyProbe for HttpProxyProbe {
    async fn probe(&self, address: &str) -> Result<()> {
        let proxy = reqwest::Proxy::all(address)
            .with_context(|| format!("Invalid proxy address {address}"))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .context("Failed to build probe client")?;

        client
            .get(&self.probe_url)
            .send()
            .await
            .with_context(|| format!("Probe through {address} failed"))?
            .error_for_status()
            .with_context(|| format!("Probe through {address} returned an error status"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_proxy_fails_probe() {
        let probe = HttpProxyProbe::new("http://example.com/", Duration::from_secs(2));
        // Port 9 (discard) is closed on test machines
        assert!(probe.probe("http://127.0.0.1:9").await.is_err());
    }

    #[tokio::test]
    async fn malformed_address_fails_probe() {
        let probe = HttpProxyProbe::new("http://example.com/", Duration::from_secs(2));
        assert!(probe.probe("not a proxy").await.is_err());
    }
}
