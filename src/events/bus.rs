//! Broadcast bus for [`ScrapeEvent`]s

use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::ScrapeEvent;
use crate::error::ErrorKind;
use crate::metrics::ScraperMetrics;

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ScrapeEvent>,
    published: AtomicU64,
    undelivered: AtomicU64,
    metrics: Arc<ScraperMetrics>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize, metrics: Arc<ScraperMetrics>) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
            undelivered: AtomicU64::new(0),
            metrics,
        }
    }

    /// Publish to every current subscriber; returns how many received it
    ///
    /// An event nobody is subscribed to is logged and counted, not an error.
    pub fn publish(&self, event: ScrapeEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let name = event.name();
        let job_id = event.job_id();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("{name} for job {job_id} delivered to {receivers} subscriber(s)");
                receivers
            }
            Err(_) => {
                warn!("{name} for job {job_id} had no subscribers");
                self.undelivered.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_error(ErrorKind::Internal);
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScrapeEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}
