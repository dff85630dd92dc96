//! Bounded-concurrency worker pool
//!
//! `workers` loops pull jobs from the [`JobQueue`]; a shared semaphore caps
//! how many of them execute at once. Each job gets its own retry budget on
//! top of the fetch pipeline's.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::JobQueue;
use super::types::{JobError, ScrapeJob};
use crate::config::JobSettings;
use crate::error::{ScrapeError, ScrapeResult};
use crate::events::{EventBus, ScrapeEvent};
use crate::metrics::ScraperMetrics;

/// Executes one attempt of a job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        job: &ScrapeJob,
        cancel: &CancellationToken,
    ) -> ScrapeResult<serde_json::Value>;
}

struct Shared {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    bus: Arc<EventBus>,
    metrics: Arc<ScraperMetrics>,
    in_flight: Arc<Semaphore>,
    retry_delay: Duration,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        settings: &JobSettings,
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        bus: Arc<EventBus>,
        metrics: Arc<ScraperMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                handler,
                bus,
                metrics,
                in_flight: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
                retry_delay: settings.retry_delay(),
            }),
            workers: settings.workers.max(1),
        }
    }

    /// Start the worker loops; they exit when `shutdown` fires
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!("Starting {} job worker(s)", self.workers);
        (0..self.workers)
            .map(|worker_id| {
                let shared = Arc::clone(&self.shared);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker_loop(worker_id, shared, shutdown).await })
            })
            .collect()
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&shared.in_flight).acquire_owned() => {
                if let Ok(p) = permit {
                    p
                } else {
                    error!("In-flight semaphore closed unexpectedly");
                    break;
                }
            }
        };

        let Some((job, cancel)) = shared.queue.next(&shutdown).await else {
            break;
        };
        debug!(worker_id, job_id = %job.id, target = %job.label(), "job picked up");
        run_job(&shared, job, cancel).await;
        drop(permit);
    }
    debug!(worker_id, "worker stopped");
}

async fn run_job(shared: &Shared, job: ScrapeJob, cancel: CancellationToken) {
    let started = Instant::now();
    let outcome = execute_with_retries(shared, &job, &cancel).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(result) => match shared.queue.complete(job.id, result.clone()).await {
            Ok(done) => {
                shared.metrics.increment_job_completed();
                info!(job_id = %done.id, target = %done.label(), duration_ms, "job completed");
                shared.bus.publish(ScrapeEvent::JobCompleted {
                    job_id: done.id,
                    target_type: done.target_type,
                    target_key: done.target_key,
                    result,
                    duration_ms,
                });
            }
            Err(e) => {
                error!(job_id = %job.id, "could not record job completion: {e}");
                shared.metrics.record_error(e.kind());
            }
        },
        Err(err) => {
            shared.metrics.record_error(err.kind());
            shared.metrics.increment_job_failed();
            warn!(job_id = %job.id, target = %job.label(), kind = %err.kind(), duration_ms, "job failed: {err}");
            if let Err(e) = shared.queue.fail(job.id, &err).await {
                error!(job_id = %job.id, "could not record job failure: {e}");
                shared.metrics.record_error(e.kind());
            }
            shared.bus.publish(ScrapeEvent::JobFailed {
                job_id: job.id,
                target_type: job.target_type,
                target_key: job.target_key,
                error: JobError::from(&err),
                duration_ms,
            });
        }
    }
}

/// Run the handler until it succeeds, fails permanently or spends the budget
///
/// Retries happen in place: the job stays `InProgress` and only its
/// `retry_count` moves.
async fn execute_with_retries(
    shared: &Shared,
    job: &ScrapeJob,
    cancel: &CancellationToken,
) -> ScrapeResult<serde_json::Value> {
    let mut current = job.clone();
    loop {
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let err = match shared.handler.handle(&current, cancel).await {
            Ok(value) => return Ok(value),
            Err(_) if cancel.is_cancelled() => return Err(ScrapeError::Cancelled),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if current.retry_count >= current.max_retries {
            return Err(ScrapeError::JobRetryExhausted {
                job_id: current.id.to_string(),
                attempts: current.retry_count + 1,
                last_error: err.to_string(),
            });
        }

        shared.metrics.record_error(err.kind());
        current = shared.queue.record_retry(current.id, &err).await?;
        warn!(
            job_id = %current.id,
            retry = current.retry_count,
            max_retries = current.max_retries,
            "retrying job after {}: {err}",
            err.kind()
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            () = tokio::time::sleep(shared.retry_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::jobs::store::{JobStore, MemoryJobStore};
    use chrono::{DateTime, Utc};
    use uuid::Uuid;
    use crate::jobs::types::{JobOptions, JobRequest, JobStatus, TargetType};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    /// Plays back a script of outcomes, then succeeds
    struct Scripted {
        outcomes: parking_lot::Mutex<VecDeque<ScrapeResult<serde_json::Value>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(outcomes: Vec<ScrapeResult<serde_json::Value>>) -> Self {
            Self {
                outcomes: parking_lot::Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobHandler for Scripted {
        async fn handle(&self, job: &ScrapeJob, _cancel: &CancellationToken) -> ScrapeResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({ "key": job.target_key })))
        }
    }

    struct Harness {
        queue: Arc<JobQueue>,
        metrics: Arc<ScraperMetrics>,
        events: broadcast::Receiver<ScrapeEvent>,
        shutdown: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    }

    fn start(handler: Arc<dyn JobHandler>, max_retries: u32) -> Harness {
        start_with_store(handler, max_retries, Arc::new(MemoryJobStore::new()))
    }

    fn start_with_store(handler: Arc<dyn JobHandler>, max_retries: u32, store: Arc<dyn JobStore>) -> Harness {
        let metrics = Arc::new(ScraperMetrics::new());
        let queue = Arc::new(JobQueue::new(store, Arc::clone(&metrics), max_retries));
        let bus = Arc::new(EventBus::new(16, Arc::clone(&metrics)));
        let events = bus.subscribe();
        let settings = JobSettings {
            workers: 2,
            max_in_flight: 2,
            default_max_retries: max_retries,
            retry_delay_ms: 5,
            ..JobSettings::default()
        };
        let shutdown = CancellationToken::new();
        let handles = WorkerPool::new(&settings, Arc::clone(&queue), handler, bus, Arc::clone(&metrics))
            .spawn(shutdown.clone());
        Harness {
            queue,
            metrics,
            events,
            shutdown,
            handles,
        }
    }

    impl Harness {
        async fn next_event(&mut self) -> ScrapeEvent {
            tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("no event within 5s")
                .expect("bus closed")
        }

        async fn stop(self) {
            self.shutdown.cancel();
            for h in self.handles {
                h.await.unwrap();
            }
        }
    }

    fn fetch_failed() -> ScrapeError {
        ScrapeError::FetchFailed {
            attempts: 3,
            message: "HTTP 503".into(),
        }
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_in_place() {
        let handler = Arc::new(Scripted::new(vec![Err(fetch_failed())]));
        let mut h = start(handler.clone(), 2);

        let id = h.queue.enqueue(JobRequest::new(TargetType::Video, "v1")).await.unwrap();
        let event = h.next_event().await;
        assert!(matches!(event, ScrapeEvent::JobCompleted { job_id, .. } if job_id == id));

        let job = h.queue.status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.metrics.snapshot().jobs_completed, 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn exhausted_budget_fails_job_with_event() {
        let handler = Arc::new(Scripted::new(vec![
            Err(fetch_failed()),
            Err(fetch_failed()),
            Err(fetch_failed()),
        ]));
        let mut h = start(handler.clone(), 1);

        let id = h.queue.enqueue(JobRequest::new(TargetType::Profile, "alice")).await.unwrap();
        match h.next_event().await {
            ScrapeEvent::JobFailed { job_id, error, .. } => {
                assert_eq!(job_id, id);
                assert_eq!(error.kind, ErrorKind::JobRetryExhausted);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let job = h.queue.status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.metrics.snapshot().jobs_failed, 1);
        assert_eq!(h.metrics.errors_of(ErrorKind::JobRetryExhausted), 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn parse_failure_is_not_retried() {
        let handler = Arc::new(Scripted::new(vec![Err(ScrapeError::ParseFailed {
            payload_ref: "video#00:0".into(),
            message: "no item".into(),
        })]));
        let mut h = start(handler.clone(), 3);

        let options = JobOptions {
            max_retries: Some(5),
            ..JobOptions::default()
        };
        let id = h
            .queue
            .enqueue(JobRequest::new(TargetType::Video, "v9").with_options(options))
            .await
            .unwrap();
        match h.next_event().await {
            ScrapeEvent::JobFailed { error, .. } => assert_eq!(error.kind, ErrorKind::ParseFailed),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.queue.status(id).await.unwrap().unwrap().retry_count, 0);
        h.stop().await;
    }

    /// Rejects every write of a terminal job
    #[derive(Default)]
    struct TerminalWritesFail(MemoryJobStore);

    #[async_trait]
    impl JobStore for TerminalWritesFail {
        async fn save(&self, job: &ScrapeJob) -> ScrapeResult<()> {
            if job.status.is_terminal() {
                return Err(ScrapeError::Storage("database is locked".into()));
            }
            self.0.save(job).await
        }
        async fn load(&self, id: Uuid) -> ScrapeResult<Option<ScrapeJob>> {
            self.0.load(id).await
        }
        async fn load_unfinished(&self) -> ScrapeResult<Vec<ScrapeJob>> {
            self.0.load_unfinished().await
        }
        async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> ScrapeResult<u64> {
            self.0.prune_terminal(cutoff).await
        }
    }

    #[tokio::test]
    async fn completion_is_announced_when_the_store_write_fails() {
        let handler = Arc::new(Scripted::new(vec![]));
        let mut h = start_with_store(handler, 1, Arc::new(TerminalWritesFail::default()));

        let id = h.queue.enqueue(JobRequest::new(TargetType::Video, "v1")).await.unwrap();
        match h.next_event().await {
            ScrapeEvent::JobCompleted { job_id, result, .. } => {
                assert_eq!(job_id, id);
                assert_eq!(result["key"], "v1");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.queue.status(id).await.unwrap().unwrap().status, JobStatus::Completed);
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(h.metrics.errors_of(ErrorKind::Storage), 1);
        h.stop().await;
    }
}
