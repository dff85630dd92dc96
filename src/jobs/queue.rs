//! Priority job queue
//!
//! Higher priority first, FIFO within a priority. Every status change is
//! written through the [`JobStore`] before it becomes visible to callers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::JobStore;
use super::types::{JobError, JobRequest, JobStatus, ScrapeJob};
use crate::error::{ScrapeError, ScrapeResult};
use crate::metrics::ScraperMetrics;

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    seq: u64,
    id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub struct JobQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    jobs: DashMap<Uuid, ScrapeJob>,
    /// Cancellation tokens of dequeued, unfinished jobs
    running: DashMap<Uuid, CancellationToken>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
    store: Arc<dyn JobStore>,
    metrics: Arc<ScraperMetrics>,
    default_max_retries: u32,
}

impl JobQueue {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, metrics: Arc<ScraperMetrics>, default_max_retries: u32) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            jobs: DashMap::new(),
            running: DashMap::new(),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            store,
            metrics,
            default_max_retries,
        }
    }

    /// Persist and queue a new job
    ///
    /// # Errors
    ///
    /// `Config` for an empty target key or a closed queue, `Storage` when the
    /// job cannot be persisted (it is then not queued).
    pub async fn enqueue(&self, request: JobRequest) -> ScrapeResult<Uuid> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScrapeError::Config("job queue is shut down".into()));
        }
        if request.target_key.trim().is_empty() {
            return Err(ScrapeError::Config("target key must not be empty".into()));
        }
        let job = ScrapeJob::new(request, self.default_max_retries);
        self.store.save(&job).await?;

        let id = job.id;
        debug!(job_id = %id, target = %job.label(), priority = job.priority, "job enqueued");
        self.push(job);
        Ok(id)
    }

    fn push(&self, job: ScrapeJob) {
        let entry = QueueEntry {
            priority: job.priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            id: job.id,
        };
        self.jobs.insert(job.id, job);
        let depth = {
            let mut heap = self.heap.lock();
            heap.push(entry);
            heap.len()
        };
        self.metrics.set_queue_depth(depth);
        self.notify.notify_one();
    }

    /// Re-queue pending and interrupted jobs from the store
    ///
    /// Interrupted jobs keep their `InProgress` status; they are retried in place.
    pub async fn recover(&self) -> ScrapeResult<usize> {
        let unfinished = self.store.load_unfinished().await?;
        let count = unfinished.len();
        for job in unfinished {
            if !self.jobs.contains_key(&job.id) {
                self.push(job);
            }
        }
        if count > 0 {
            info!("Recovered {count} unfinished job(s)");
        }
        Ok(count)
    }

    /// Wait for the next runnable job
    ///
    /// The job is moved to `InProgress` and persisted; the returned token is
    /// cancelled by [`JobQueue::cancel`]. `None` once `shutdown` fires or the
    /// queue is closed.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<(ScrapeJob, CancellationToken)> {
        loop {
            if shutdown.is_cancelled() || self.closed.load(Ordering::Acquire) {
                return None;
            }

            let popped = {
                let mut heap = self.heap.lock();
                let entry = heap.pop();
                (entry, heap.len())
            };
            let (entry, depth) = popped;
            self.metrics.set_queue_depth(depth);

            let Some(entry) = entry else {
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = self.notify.notified() => continue,
                }
            };

            match self.start(entry.id, shutdown).await {
                Ok(Some(started)) => return Some(started),
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %entry.id, "could not start job: {e}");
                    self.metrics.record_error(e.kind());
                }
            }
        }
    }

    /// `Pending -> InProgress`; an interrupted `InProgress` job is resumed as is
    ///
    /// The cancellation token is registered under the same map guard as the
    /// status change, so [`JobQueue::cancel`] never sees a started job without one.
    async fn start(
        &self,
        id: Uuid,
        shutdown: &CancellationToken,
    ) -> ScrapeResult<Option<(ScrapeJob, CancellationToken)>> {
        let (job, token) = {
            let Some(mut job) = self.jobs.get_mut(&id) else {
                return Ok(None);
            };
            match job.status {
                JobStatus::Pending => job.transition(JobStatus::InProgress)?,
                JobStatus::InProgress => {}
                // cancelled while queued
                JobStatus::Completed | JobStatus::Failed => return Ok(None),
            }
            let token = shutdown.child_token();
            self.running.insert(id, token.clone());
            (job.clone(), token)
        };
        if let Err(e) = self.store.save(&job).await {
            self.running.remove(&id);
            return Err(e);
        }
        Ok(Some((job, token)))
    }

    fn update<F>(&self, id: Uuid, f: F) -> ScrapeResult<ScrapeJob>
    where
        F: FnOnce(&mut ScrapeJob) -> ScrapeResult<()>,
    {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| ScrapeError::Internal(format!("unknown job {id}")))?;
        f(&mut job)?;
        Ok(job.clone())
    }

    /// Mark a running job `Completed`
    ///
    /// # Errors
    ///
    /// Only for an invalid transition. A failed store write is logged and
    /// counted; the in-memory job is already terminal and is returned.
    pub async fn complete(&self, id: Uuid, result: serde_json::Value) -> ScrapeResult<ScrapeJob> {
        let job = self.update(id, |job| {
            job.transition(JobStatus::Completed)?;
            job.result = Some(result);
            Ok(())
        })?;
        self.running.remove(&id);
        self.persist_terminal(&job).await;
        Ok(job)
    }

    /// Mark a job `Failed`; store failures are handled as in [`JobQueue::complete`]
    pub async fn fail(&self, id: Uuid, error: &ScrapeError) -> ScrapeResult<ScrapeJob> {
        let job = self.update(id, |job| {
            job.transition(JobStatus::Failed)?;
            job.error = Some(JobError::from(error));
            Ok(())
        })?;
        self.running.remove(&id);
        self.persist_terminal(&job).await;
        Ok(job)
    }

    async fn persist_terminal(&self, job: &ScrapeJob) {
        if let Err(e) = self.store.save(job).await {
            error!(job_id = %job.id, status = %job.status, "could not persist terminal job state: {e}");
            self.metrics.record_error(e.kind());
        }
    }

    /// Spend one job-level retry; the job stays `InProgress`
    pub async fn record_retry(&self, id: Uuid, error: &ScrapeError) -> ScrapeResult<ScrapeJob> {
        let job = self.update(id, |job| {
            if job.status != JobStatus::InProgress {
                return Err(ScrapeError::InvalidTransition {
                    from: job.status.to_string(),
                    to: JobStatus::InProgress.to_string(),
                });
            }
            job.retry_count += 1;
            job.error = Some(JobError::from(error));
            Ok(())
        })?;
        self.store.save(&job).await?;
        Ok(job)
    }

    /// Cancel a job
    ///
    /// A pending job fails immediately with `Cancelled`; a running job has its
    /// token cancelled and is failed by its worker. Returns `false` for
    /// terminal or unknown jobs.
    pub async fn cancel(&self, id: Uuid) -> ScrapeResult<bool> {
        let queued = {
            let Some(mut job) = self.jobs.get_mut(&id) else {
                return Ok(false);
            };
            match job.status {
                JobStatus::Completed | JobStatus::Failed => return Ok(false),
                JobStatus::Pending | JobStatus::InProgress => {
                    if let Some(token) = self.running.get(&id) {
                        token.cancel();
                        debug!(job_id = %id, "running job cancelled");
                        return Ok(true);
                    }
                    // still queued, or recovered and not yet picked up again
                    job.transition(JobStatus::Failed)?;
                    job.error = Some(JobError::from(&ScrapeError::Cancelled));
                    job.clone()
                }
            }
        };

        self.persist_terminal(&queued).await;
        let depth = {
            let mut heap = self.heap.lock();
            heap.retain(|e| e.id != id);
            heap.len()
        };
        self.metrics.set_queue_depth(depth);
        info!(job_id = %id, "queued job cancelled");
        Ok(true)
    }

    /// Current state of a job, falling back to the store for pruned ones
    pub async fn status(&self, id: Uuid) -> ScrapeResult<Option<ScrapeJob>> {
        if let Some(job) = self.jobs.get(&id) {
            return Ok(Some(job.clone()));
        }
        self.store.load(id).await
    }

    /// Drop terminal jobs finished before `cutoff` from memory and the store
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> ScrapeResult<u64> {
        self.jobs
            .retain(|_, j| !(j.status.is_terminal() && j.finished_at.is_some_and(|t| t < cutoff)));
        self.store.prune_terminal(cutoff).await
    }

    /// Drop terminal jobs that finished more than `age` ago
    pub async fn prune_older_than(&self, age: Duration) -> ScrapeResult<u64> {
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.prune(cutoff).await
    }

    /// Periodically prune jobs older than `retention`; exits when `cancel` fires
    pub fn spawn_pruner(
        self: &Arc<Self>,
        retention: Duration,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => match queue.prune_older_than(retention).await {
                        Ok(0) => {}
                        Ok(pruned) => debug!(pruned, "pruned finished jobs"),
                        Err(e) => {
                            warn!("job prune failed: {e}");
                            queue.metrics.record_error(e.kind());
                        }
                    },
                }
            }
            debug!("job pruner stopped");
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.heap.lock().len()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Stop handing out jobs; waiting workers return `None`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn cancel_running(&self) {
        for entry in &self.running {
            entry.value().cancel();
        }
    }
}
