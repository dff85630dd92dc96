use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::ErrorKind;

/// Process-wide scraper counters, owned by the supervisor and shared by `Arc`.
///
/// All counters use `Ordering::SeqCst` so a snapshot reads a coherent set.
/// Gauges (`active_browsers`, `queue_depth`) are set by their owning module.
#[derive(Debug, Default)]
pub struct ScraperMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    response_time_total_ms: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    proxy_rotations: AtomicU64,
    active_browsers: AtomicI64,
    queue_depth: AtomicI64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    errors_by_kind: [AtomicU64; ErrorKind::ALL.len()],
}

impl ScraperMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One finished outbound call attempt, successful or not
    pub fn record_request(&self, success: bool, elapsed_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::SeqCst);
        if success {
            self.requests_success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.requests_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.response_time_total_ms
            .fetch_add(elapsed_ms, Ordering::SeqCst);
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_proxy_rotation(&self) {
        self.proxy_rotations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_active_browsers(&self, count: usize) {
        self.active_browsers
            .store(i64::try_from(count).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth
            .store(i64::try_from(depth).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    pub fn increment_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Count an error that was handled or surfaced somewhere in the crate
    pub fn record_error(&self, kind: ErrorKind) {
        self.errors_by_kind[kind.index()].fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn errors_of(&self, kind: ErrorKind) -> u64 {
        self.errors_by_kind[kind.index()].load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_total = self.requests_total.load(Ordering::SeqCst);
        let response_time_total = self.response_time_total_ms.load(Ordering::SeqCst);
        let avg_response_time_ms = if requests_total == 0 {
            0.0
        } else {
            response_time_total as f64 / requests_total as f64
        };

        MetricsSnapshot {
            requests_total,
            requests_success: self.requests_success.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            avg_response_time_ms,
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            cache_misses: self.cache_misses.load(Ordering::SeqCst),
            proxy_rotations: self.proxy_rotations.load(Ordering::SeqCst),
            active_browsers: self.active_browsers.load(Ordering::SeqCst).max(0) as u64,
            queue_depth: self.queue_depth.load(Ordering::SeqCst).max(0) as u64,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            errors_by_kind: ErrorKind::ALL
                .iter()
                .map(|k| (*k, self.errors_of(*k)))
                .filter(|(_, n)| *n > 0)
                .collect(),
        }
    }
}

/// Point-in-time copy of [`ScraperMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub avg_response_time_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub proxy_rotations: u64,
    pub active_browsers: u64,
    pub queue_depth: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Non-zero error counters only
    pub errors_by_kind: Vec<(ErrorKind, u64)>,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 1.0;
        }
        self.requests_success as f64 / self.requests_total as f64
    }
}
