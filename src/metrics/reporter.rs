//! Periodic metrics emission
//!
//! A producer task snapshots [`ScraperMetrics`] every interval and sends the
//! point over a bounded channel; a consumer task writes it to the sink. A slow
//! or failing collector therefore never blocks the code recording counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::counters::{MetricsSnapshot, ScraperMetrics};
use super::sink::MetricsSink;
use crate::error::ErrorKind;
use crate::utils::constants::{METRICS_MEASUREMENT, METRICS_SERVICE_TAG};

const CHANNEL_CAPACITY: usize = 64;

/// One timestamped snapshot, tagged `service=scraper`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
}

impl MetricsPoint {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, snapshot: MetricsSnapshot) -> Self {
        Self { timestamp, snapshot }
    }

    /// InfluxDB line protocol, nanosecond precision
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        let s = &self.snapshot;
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis().saturating_mul(1_000_000));
        format!(
            "{METRICS_MEASUREMENT},service={METRICS_SERVICE_TAG} \
             requestsTotal={}i,requestsSuccess={}i,requestsFailed={}i,avgResponseTimeMs={},\
             cacheHits={}i,cacheMisses={}i,proxyRotations={}i,activeBrowsers={}i,queueDepth={}i \
             {nanos}",
            s.requests_total,
            s.requests_success,
            s.requests_failed,
            s.avg_response_time_ms,
            s.cache_hits,
            s.cache_misses,
            s.proxy_rotations,
            s.active_browsers,
            s.queue_depth,
        )
    }
}

pub struct MetricsReporter {
    metrics: Arc<ScraperMetrics>,
    interval: Duration,
}

impl MetricsReporter {
    #[must_use]
    pub fn new(metrics: Arc<ScraperMetrics>, interval: Duration) -> Self {
        Self {
            metrics,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    #[must_use]
    pub fn tick(&self) -> MetricsPoint {
        MetricsPoint::new(Utc::now(), self.metrics.snapshot())
    }

    /// Start the producer/consumer pair
    ///
    /// On cancellation a final point is emitted; the returned handle resolves
    /// once the sink has written it.
    pub fn spawn(self, sink: Arc<dyn MetricsSink>, cancel: CancellationToken) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<MetricsPoint>(CHANNEL_CAPACITY);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx.send(self.tick()).await;
                        debug!("metrics producer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if tx.try_send(self.tick()).is_err() {
                            warn!("metrics channel full, dropping point");
                            self.metrics.record_error(ErrorKind::Internal);
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(point) = rx.recv().await {
                if let Err(e) = sink.write(std::slice::from_ref(&point)).await {
                    warn!("metrics write failed: {e:#}");
                    metrics.record_error(ErrorKind::Internal);
                }
            }
        })
    }
}
