//! Rate-limited fetch pipeline
//!
//! Every outbound call goes through, in order:
//! 1. the per-class circuit breaker (fast `CircuitOpen` when degraded)
//! 2. the per-class token bucket (bounded wait)
//! 3. the call itself under a fixed timeout
//! 4. retry with exponential back-off on transient failures
//!
//! `429`-style responses sleep for the server's hint and do not consume a
//! retry slot. Cancellation is checked between attempts; a call already in
//! flight is allowed to finish and its result is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::circuit_breaker::{BreakerDecision, CircuitBreaker};
use super::rate_limiter::RateLimiter;
use super::retry::{AttemptError, RetryPolicy};
use super::target::TargetClass;
use crate::config::FetchSettings;
use crate::error::{ScrapeError, ScrapeResult};
use crate::metrics::ScraperMetrics;
use crate::utils::with_call_timeout;

pub struct FetchPipeline {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
    max_rate_limit_waits: u32,
    metrics: Arc<ScraperMetrics>,
}

impl FetchPipeline {
    #[must_use]
    pub fn new(settings: &FetchSettings, metrics: Arc<ScraperMetrics>) -> Self {
        Self {
            limiter: RateLimiter::new(
                settings.api_bucket,
                settings.navigation_bucket,
                settings.limiter_max_wait(),
            ),
            breaker: CircuitBreaker::new(settings.breaker),
            retry: RetryPolicy::new(settings.retry),
            call_timeout: settings.call_timeout(),
            max_rate_limit_waits: settings.max_rate_limit_waits,
            metrics,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `op` through breaker, limiter, timeout and retry
    ///
    /// `op` receives the 0-based attempt number and is invoked once per attempt.
    ///
    /// # Errors
    ///
    /// - `CircuitOpen` when the class breaker rejects the call
    /// - `ResourceExhausted` when no rate-limit token arrives in time
    /// - `FetchFailed` when the retry budget is spent or the failure is permanent
    /// - `Cancelled` when `cancel` fires between attempts
    /// - any error carried by [`AttemptError::Fatal`]
    pub async fn execute<T, F, Fut>(
        &self,
        class: TargetClass,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> ScrapeResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;
        let mut rate_limit_waits: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            let decision = self.breaker.check(class);
            if let BreakerDecision::Reject { retry_after } = decision {
                debug!(target_class = %class, %label, ?retry_after, "circuit open, short-circuiting");
                return Err(ScrapeError::CircuitOpen {
                    target: class,
                    retry_after,
                });
            }
            let lease = decision.lease();

            let acquired = tokio::select! {
                () = cancel.cancelled() => Err(ScrapeError::Cancelled),
                acquired = self.limiter.acquire(class) => acquired,
            };
            if let Err(err) = acquired {
                self.breaker.release_probe(class, lease);
                return Err(err);
            }

            let started = Instant::now();
            let outcome = with_call_timeout(op(attempt), self.call_timeout, label).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            attempt += 1;

            let outcome = match outcome {
                Ok(inner) => inner,
                Err(timed_out) => Err(AttemptError::Transient(timed_out.to_string())),
            };

            if cancel.is_cancelled() {
                self.metrics.record_request(outcome.is_ok(), elapsed_ms);
                self.breaker.release_probe(class, lease);
                debug!(%label, "result discarded, fetch was cancelled");
                return Err(ScrapeError::Cancelled);
            }

            match outcome {
                Ok(value) => {
                    self.metrics.record_request(true, elapsed_ms);
                    self.breaker.record_success(class, lease);
                    return Ok(value);
                }
                Err(AttemptError::Transient(message)) => {
                    self.metrics.record_request(false, elapsed_ms);
                    self.breaker.record_failure(class, lease, &message);
                    failures += 1;
                    if failures >= self.retry.max_attempts() {
                        warn!(%label, attempts = attempt, error = %message, "fetch retry budget exhausted");
                        return Err(ScrapeError::FetchFailed {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.retry.delay_for(failures - 1);
                    warn!(
                        %label,
                        attempt,
                        max_attempts = self.retry.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient fetch error, retrying after back-off"
                    );
                    self.pause(delay, cancel).await?;
                }
                Err(AttemptError::RateLimited {
                    retry_after,
                    message,
                }) => {
                    self.metrics.record_request(false, elapsed_ms);
                    self.breaker.release_probe(class, lease);
                    rate_limit_waits += 1;
                    if rate_limit_waits > self.max_rate_limit_waits {
                        warn!(%label, waits = rate_limit_waits - 1, "giving up after repeated rate limiting");
                        return Err(ScrapeError::FetchFailed {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay =
                        retry_after.unwrap_or_else(|| self.retry.delay_for(rate_limit_waits - 1));
                    warn!(%label, delay_ms = delay.as_millis() as u64, "rate limited by remote, waiting");
                    self.pause(delay, cancel).await?;
                }
                Err(AttemptError::Permanent(message)) => {
                    self.metrics.record_request(false, elapsed_ms);
                    // The remote answered; the class itself is reachable
                    self.breaker.record_success(class, lease);
                    return Err(ScrapeError::FetchFailed {
                        attempts: attempt,
                        message,
                    });
                }
                Err(AttemptError::Fatal(err)) => {
                    self.metrics.record_request(false, elapsed_ms);
                    self.breaker.release_probe(class, lease);
                    return Err(err);
                }
            }
        }
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> ScrapeResult<()> {
        tokio::select! {
            () = cancel.cancelled() => Err(ScrapeError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerSettings, BucketSettings, RetrySettings};
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> FetchSettings {
        FetchSettings {
            api_bucket: BucketSettings::new(100, 100.0),
            navigation_bucket: BucketSettings::new(100, 100.0),
            call_timeout_ms: 200,
            retry: RetrySettings {
                max_attempts: 3,
                base_delay_ms: 5,
                multiplier: 2.0,
                max_delay_ms: 20,
                jitter: 0.0,
            },
            breaker: BreakerSettings {
                failure_threshold: 10,
                ..BreakerSettings::default()
            },
            max_rate_limit_waits: 2,
            ..FetchSettings::default()
        }
    }

    fn pipeline() -> (FetchPipeline, Arc<ScraperMetrics>) {
        let metrics = Arc::new(ScraperMetrics::new());
        (FetchPipeline::new(&settings(), metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (p, metrics) = pipeline();
        let calls = AtomicU32::new(0);
        let value = p
            .execute(TargetClass::Api, "t", &CancellationToken::new(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AttemptError::transient("503"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, 2);
        let snap = metrics.snapshot();
        assert_eq!(snap.requests_failed, 2);
        assert_eq!(snap.requests_success, 1);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_is_fetch_failed() {
        let (p, _) = pipeline();
        let err = p
            .execute(TargetClass::Api, "t", &CancellationToken::new(), |_| async {
                Err::<(), _>(AttemptError::transient("reset"))
            })
            .await
            .expect_err("never succeeds");
        match err {
            ScrapeError::FetchFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limits_do_not_consume_retry_slots() {
        let (p, _) = pipeline();
        let calls = AtomicU32::new(0);
        // 2 rate limits + 2 transient failures + success = 5 calls with max_attempts 3
        let result = p
            .execute(TargetClass::Api, "t", &CancellationToken::new(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 | 2 => Err(AttemptError::rate_limited(Some(Duration::from_millis(5)))),
                        1 | 3 => Err(AttemptError::transient("503")),
                        _ => Ok("ok"),
                    }
                }
            })
            .await;
        assert_eq!(result.expect("succeeds on fifth call"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let (p, _) = pipeline();
        let calls = AtomicU32::new(0);
        let err = p
            .execute(TargetClass::Navigation, "t", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttemptError::permanent("404")) }
            })
            .await
            .expect_err("404 is final");
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let (p, metrics) = pipeline();
        let err = p
            .execute(TargetClass::Api, "slow", &CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AttemptError>(())
            })
            .await
            .expect_err("every attempt times out");
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert_eq!(metrics.snapshot().requests_failed, 3);
    }

    #[tokio::test]
    async fn open_circuit_skips_the_call() {
        let mut s = settings();
        s.breaker.failure_threshold = 2;
        s.retry.max_attempts = 5;
        let p = FetchPipeline::new(&s, Arc::new(ScraperMetrics::new()));
        let calls = AtomicU32::new(0);
        let err = p
            .execute(TargetClass::Api, "t", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttemptError::transient("down")) }
            })
            .await
            .expect_err("breaker opens mid-retry");
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_between_attempts() {
        let (p, _) = pipeline();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = p
            .execute(TargetClass::Api, "t", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                async { Err::<(), _>(AttemptError::transient("x")) }
            })
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_errors_pass_through() {
        let (p, _) = pipeline();
        let err = p
            .execute(TargetClass::Navigation, "t", &CancellationToken::new(), |_| async {
                Err::<(), _>(AttemptError::Fatal(ScrapeError::StaleResource("page 3".into())))
            })
            .await
            .expect_err("stale page");
        assert_eq!(err.kind(), ErrorKind::StaleResource);
    }
}
