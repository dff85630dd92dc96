//! Per-attempt error classification and exponential back-off
//!
//! Every fetch attempt ends in one of the [`AttemptError`] classes; the
//! pipeline decides from the class whether to retry, wait out a rate limit,
//! or give up.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RetrySettings;
use crate::error::ScrapeError;
use crate::utils::constants::MAX_RETRY_AFTER_SECS;

/// Outcome class of a single failed attempt
#[derive(Debug, Clone)]
pub enum AttemptError {
    /// Network failure, timeout or 5xx: retried with back-off
    Transient(String),
    /// `429`-style throttling; waits `retry_after` without consuming a retry slot
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    /// 4xx or otherwise hopeless: surfaced immediately as `FetchFailed`
    Permanent(String),
    /// Error that must reach the caller unchanged (e.g. `StaleResource`)
    Fatal(ScrapeError),
}

impl AttemptError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            retry_after,
            message: "rate limited by remote".to_string(),
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m.clone(),
            Self::RateLimited { message, .. } => message.clone(),
            Self::Fatal(e) => e.to_string(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient: {m}"),
            Self::RateLimited { retry_after, .. } => {
                write!(f, "rate limited (retry after {retry_after:?})")
            }
            Self::Permanent(m) => write!(f, "permanent: {m}"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

impl From<ScrapeError> for AttemptError {
    fn from(err: ScrapeError) -> Self {
        Self::Fatal(err)
    }
}

/// Exponential back-off schedule
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts.max(1)
    }

    /// Un-jittered delay after the `attempt`-th failure (0-based)
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base = self.settings.base_delay_ms as f64;
        let factor = self.settings.multiplier.powi(attempt.min(30) as i32);
        let capped = (base * factor).min(self.settings.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay after the `attempt`-th failure, with ±`jitter` spread
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt).as_millis() as f64;
        let jitter = self.settings.jitter.clamp(0.0, 1.0);
        let spread = 1.0 - jitter + rand::random::<f64>() * 2.0 * jitter;
        Duration::from_millis((base * spread) as u64)
    }
}

/// Parse a `Retry-After` header value: delta seconds or an HTTP date
///
/// The result is capped at [`MAX_RETRY_AFTER_SECS`].
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let cap = Duration::from_secs(MAX_RETRY_AFTER_SECS);
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs).min(cap));
    }
    if let Ok(secs) = value.parse::<f64>()
        && secs.is_finite()
        && secs >= 0.0
    {
        return Some(Duration::try_from_secs_f64(secs).map_or(cap, |d| d.min(cap)));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO).min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(RetrySettings {
            max_attempts: 4,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 500,
            jitter,
        })
    }

    #[test]
    fn delays_grow_and_cap() {
        let p = policy(0.0);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(500));
        assert_eq!(p.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_band() {
        let p = policy(0.25);
        for _ in 0..200 {
            let d = p.delay_for(1).as_millis();
            assert!((150..=250).contains(&d), "{d}ms outside ±25% of 200ms");
        }
    }

    #[test]
    fn retry_after_seconds_and_dates() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        let cap = Some(Duration::from_secs(MAX_RETRY_AFTER_SECS));
        assert_eq!(parse_retry_after("1e300"), cap);
        assert_eq!(parse_retry_after("18446744073709551615"), cap);
        assert_eq!(parse_retry_after("86400.5"), cap);
        assert_eq!(parse_retry_after("Fri, 31 Dec 9999 23:59:59 GMT"), cap);
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after("NaN"), None);
    }
}
