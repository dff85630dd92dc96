//! Destinations for periodic metrics points

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::reporter::MetricsPoint;

/// Receives batches of metrics points from the reporter
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, points: &[MetricsPoint]) -> Result<()>;
}

/// Writes InfluxDB line protocol to an HTTP write endpoint
pub struct InfluxLineSink {
    client: reqwest::Client,
    write_url: String,
    token: Option<String>,
}

impl InfluxLineSink {
    pub fn new(write_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build metrics HTTP client")?;
        Ok(Self {
            client,
            write_url: write_url.into(),
            token,
        })
    }
}

#[async_trait]
impl MetricsSink for InfluxLineSink {
    async fn write(&self, points: &[MetricsPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points
            .iter()
            .map(MetricsPoint::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = self
            .client
            .post(&self.write_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to write metrics to {}", self.write_url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("metrics write rejected with HTTP {status}");
        }
        Ok(())
    }
}

/// Logs each point; used when no collector is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn write(&self, points: &[MetricsPoint]) -> Result<()> {
        for point in points {
            let s = &point.snapshot;
            info!(
                requests_total = s.requests_total,
                requests_failed = s.requests_failed,
                avg_response_time_ms = s.avg_response_time_ms,
                cache_hit_rate = s.cache_hit_rate(),
                proxy_rotations = s.proxy_rotations,
                active_browsers = s.active_browsers,
                queue_depth = s.queue_depth,
                "metrics"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ScraperMetrics;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn influx_sink_posts_line_protocol() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_header("authorization", "Token secret")
            .match_body(mockito::Matcher::Regex(
                r"^scraper_metrics,service=scraper requestsTotal=1i,".to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let metrics = ScraperMetrics::new();
        metrics.record_request(true, 10);
        let point = MetricsPoint::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), metrics.snapshot());

        let sink = InfluxLineSink::new(
            format!("{}/api/v2/write", server.url()),
            Some("secret".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        sink.write(&[point]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn influx_sink_surfaces_rejections() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/write").with_status(500).create_async().await;

        let sink = InfluxLineSink::new(format!("{}/write", server.url()), None, Duration::from_secs(2)).unwrap();
        let point = MetricsPoint::new(Utc::now(), ScraperMetrics::new().snapshot());
        assert!(sink.write(&[point]).await.is_err());
    }
}
