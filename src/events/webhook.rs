//! Forwards completion events to an external orchestrator

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ScrapeEvent;
use crate::config::WebhookSettings;
use crate::error::ErrorKind;
use crate::metrics::ScraperMetrics;

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    metrics: Arc<ScraperMetrics>,
}

impl WebhookNotifier {
    pub fn new(settings: &WebhookSettings, metrics: Arc<ScraperMetrics>) -> Result<Self> {
        Self::with_timeout(settings.url.clone(), settings.timeout(), metrics)
    }

    pub fn with_timeout(url: String, timeout: Duration, metrics: Arc<ScraperMetrics>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client, url, metrics })
    }

    /// POST one event as JSON
    pub async fn notify(&self, event: &ScrapeEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("Failed to deliver {} to {}", event.name(), self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("webhook rejected {} with HTTP {status}", event.name());
        }
        debug!("{} for job {} delivered", event.name(), event.job_id());
        Ok(())
    }

    /// Deliver events from `events` until cancelled or the bus closes
    ///
    /// Delivery failures and lagged events are logged and counted; they never
    /// stop the loop.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<ScrapeEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = events.recv() => received,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = self.notify(&event).await {
                            warn!("webhook delivery failed: {e:#}");
                            self.metrics.record_error(ErrorKind::Internal);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("webhook notifier lagged, {skipped} event(s) skipped");
                        self.metrics.record_error(ErrorKind::Internal);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::jobs::TargetType;
    use uuid::Uuid;

    #[tokio::test]
    async fn forwards_completed_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "event": "job.completed",
                "targetKey": "v1"
            })))
            .with_status(200)
            .create_async()
            .await;

        let metrics = Arc::new(ScraperMetrics::new());
        let bus = EventBus::new(8, Arc::clone(&metrics));
        let notifier =
            WebhookNotifier::with_timeout(format!("{}/hook", server.url()), Duration::from_secs(2), Arc::clone(&metrics))
                .unwrap();
        let cancel = CancellationToken::new();
        let handle = notifier.spawn(bus.subscribe(), cancel.clone());

        bus.publish(ScrapeEvent::JobCompleted {
            job_id: Uuid::new_v4(),
            target_type: TargetType::Video,
            target_key: "v1".into(),
            result: serde_json::json!({"id": "v1"}),
            duration_ms: 10,
        });

        for _ in 0..50 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        mock.assert_async().await;
        assert_eq!(metrics.errors_of(ErrorKind::Internal), 0);
    }

    #[tokio::test]
    async fn rejected_delivery_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/hook").with_status(503).create_async().await;
        let notifier = WebhookNotifier::with_timeout(
            format!("{}/hook", server.url()),
            Duration::from_secs(2),
            Arc::new(ScraperMetrics::new()),
        )
        .unwrap();
        let event = ScrapeEvent::JobCompleted {
            job_id: Uuid::new_v4(),
            target_type: TargetType::Trend,
            target_key: "s".into(),
            result: serde_json::Value::Null,
            duration_ms: 1,
        };
        assert!(notifier.notify(&event).await.is_err());
    }
}
