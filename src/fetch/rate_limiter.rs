//! Token-bucket rate limiter with one bucket per target class
//!
//! Buckets use lock-free fixed-point arithmetic: token counts are kept in
//! thousandths of a token so slow refill rates (e.g. one navigation every two
//! seconds) still accumulate precisely. The limiter is owned by the pipeline
//! that uses it; there is no process-global bucket state.
//!
//! `try_acquire` returns an immediate decision, `acquire` suspends the caller
//! until a token is available or the configured maximum wait would be exceeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use super::target::TargetClass;
use crate::config::BucketSettings;
use crate::error::{ScrapeError, ScrapeResult};

/// Scaling factor for fixed-point token arithmetic (1000x precision)
const TOKEN_SCALE: u64 = 1000;

/// Rate limit decision for one outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Call may proceed, one token was consumed
    Allow,
    /// Bucket is empty, a token will be available after `retry_after`
    Deny { retry_after: Duration },
}

/// Atomic token bucket
#[derive(Debug)]
struct TokenBucket {
    /// Available tokens scaled by `TOKEN_SCALE`
    tokens: AtomicU64,
    /// Last refill as nanoseconds since the limiter's epoch
    last_refill_nanos: AtomicU64,
    /// Nanoseconds needed to produce one scaled unit (1/`TOKEN_SCALE` token)
    nanos_per_unit: u64,
    /// Capacity scaled by `TOKEN_SCALE`
    max_tokens: u64,
}

impl TokenBucket {
    fn new(settings: BucketSettings, now_nanos: u64) -> Self {
        let max_tokens = u64::from(settings.capacity.max(1)) * TOKEN_SCALE;
        let units_per_sec = settings.refill_per_sec * TOKEN_SCALE as f64;
        let nanos_per_unit = if units_per_sec > 0.0 {
            ((1_000_000_000.0 / units_per_sec) as u64).max(1)
        } else {
            u64::MAX
        };
        Self {
            tokens: AtomicU64::new(max_tokens),
            last_refill_nanos: AtomicU64::new(now_nanos),
            nanos_per_unit,
            max_tokens,
        }
    }

    fn try_consume(&self, now_nanos: u64) -> RateLimitDecision {
        self.refill(now_nanos);

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current < TOKEN_SCALE {
                let units_needed = TOKEN_SCALE - current;
                // Time already elapsed towards the next unit is not yet credited
                let last = self.last_refill_nanos.load(Ordering::Acquire);
                let partial = now_nanos.saturating_sub(last);
                let nanos_needed = units_needed
                    .saturating_mul(self.nanos_per_unit)
                    .saturating_sub(partial)
                    .max(1_000_000);
                return RateLimitDecision::Deny {
                    retry_after: Duration::from_nanos(nanos_needed),
                };
            }

            if self
                .tokens
                .compare_exchange_weak(
                    current,
                    current - TOKEN_SCALE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return RateLimitDecision::Allow;
            }
        }
    }

    /// Add the tokens produced since the last refill
    ///
    /// `last_refill_nanos` only advances by the time that actually produced
    /// tokens, so sub-unit remainders keep accumulating across calls.
    fn refill(&self, now_nanos: u64) {
        loop {
            let last = self.last_refill_nanos.load(Ordering::Acquire);
            if now_nanos <= last {
                return;
            }

            let elapsed = now_nanos - last;
            let units = elapsed / self.nanos_per_unit;
            if units == 0 {
                return;
            }

            let current = self.tokens.load(Ordering::Acquire);
            // A full bucket does not bank idle time
            let new_last = if current >= self.max_tokens {
                now_nanos
            } else {
                last.saturating_add(units.saturating_mul(self.nanos_per_unit))
            };

            if self
                .last_refill_nanos
                .compare_exchange_weak(last, new_last, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let mut current = current;
            loop {
                let next = current.saturating_add(units).min(self.max_tokens);
                if next == current {
                    return;
                }
                match self.tokens.compare_exchange_weak(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
                    Err(actual) => current = actual,
                }
            }
        }
    }

    fn available(&self, now_nanos: u64) -> f64 {
        self.refill(now_nanos);
        self.tokens.load(Ordering::Acquire) as f64 / TOKEN_SCALE as f64
    }
}

/// Per-target-class rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    buckets: HashMap<TargetClass, TokenBucket>,
    epoch: Instant,
    max_wait: Duration,
}

impl RateLimiter {
    /// Build a limiter with one bucket per target class
    #[must_use]
    pub fn new(api: BucketSettings, navigation: BucketSettings, max_wait: Duration) -> Self {
        let epoch = Instant::now();
        let mut buckets = HashMap::with_capacity(TargetClass::ALL.len());
        buckets.insert(TargetClass::Api, TokenBucket::new(api, 0));
        buckets.insert(TargetClass::Navigation, TokenBucket::new(navigation, 0));
        Self {
            buckets,
            epoch,
            max_wait,
        }
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn bucket(&self, class: TargetClass) -> &TokenBucket {
        // Both classes are inserted in `new`
        &self.buckets[&class]
    }

    /// Consume a token if one is available, without waiting
    pub fn try_acquire(&self, class: TargetClass) -> RateLimitDecision {
        self.bucket(class).try_consume(self.now_nanos())
    }

    /// Wait for a token, up to the limiter's maximum wait
    ///
    /// Returns how long the caller was held back.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when the next token would arrive after the maximum wait.
    pub async fn acquire(&self, class: TargetClass) -> ScrapeResult<Duration> {
        let started = Instant::now();
        loop {
            match self.try_acquire(class) {
                RateLimitDecision::Allow => return Ok(started.elapsed()),
                RateLimitDecision::Deny { retry_after } => {
                    let waited = started.elapsed();
                    if waited + retry_after > self.max_wait {
                        return Err(ScrapeError::resource_exhausted(
                            format!("{class} rate-limit token"),
                            waited,
                        ));
                    }
                    trace!(target_class = %class, ?retry_after, "waiting for rate-limit token");
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// Tokens currently available in a class bucket
    #[must_use]
    pub fn available(&self, class: TargetClass) -> f64 {
        self.bucket(class).available(self.now_nanos())
    }
}
