//! Error taxonomy shared by every module
//!
//! Each variant maps to a stable [`ErrorKind`] that is carried on job status,
//! `job.failed` events and the `errors_by_kind` metrics counter.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::TargetClass;

/// Stable, serialisable classification of a [`ScrapeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceExhausted,
    CircuitOpen,
    StaleResource,
    FetchFailed,
    ParseFailed,
    JobRetryExhausted,
    Cancelled,
    InvalidTransition,
    Storage,
    Config,
    Prediction,
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        Self::ResourceExhausted,
        Self::CircuitOpen,
        Self::StaleResource,
        Self::FetchFailed,
        Self::ParseFailed,
        Self::JobRetryExhausted,
        Self::Cancelled,
        Self::InvalidTransition,
        Self::Storage,
        Self::Config,
        Self::Prediction,
        Self::Internal,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExhausted => "resource_exhausted",
            Self::CircuitOpen => "circuit_open",
            Self::StaleResource => "stale_resource",
            Self::FetchFailed => "fetch_failed",
            Self::ParseFailed => "parse_failed",
            Self::JobRetryExhausted => "job_retry_exhausted",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition => "invalid_transition",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Prediction => "prediction",
            Self::Internal => "internal",
        }
    }

    /// Position in [`ErrorKind::ALL`], used for fixed-size counter arrays
    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the pools, the fetch pipeline, the cache and the job layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScrapeError {
    /// A pool checkout or rate-limit token wait timed out
    #[error("{resource} not available within {waited:?}")]
    ResourceExhausted { resource: String, waited: Duration },

    /// The target class is degraded; calls are short-circuited
    #[error("circuit open for {target} target class, retry after {retry_after:?}")]
    CircuitOpen {
        target: TargetClass,
        retry_after: Duration,
    },

    /// A checked-out handle was invalidated underneath the caller
    #[error("stale resource: {0}")]
    StaleResource(String),

    /// Terminal after the pipeline retry budget is spent
    #[error("fetch failed after {attempts} attempt(s): {message}")]
    FetchFailed { attempts: u32, message: String },

    /// Response did not have the expected shape
    #[error("could not parse {payload_ref}: {message}")]
    ParseFailed {
        payload_ref: String,
        message: String,
    },

    /// The job-level retry budget is spent
    #[error("job {job_id} failed after {attempts} attempt(s): {last_error}")]
    JobRetryExhausted {
        job_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid job status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("prediction service error: {0}")]
    Prediction(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScrapeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::StaleResource(_) => ErrorKind::StaleResource,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::ParseFailed { .. } => ErrorKind::ParseFailed,
            Self::JobRetryExhausted { .. } => ErrorKind::JobRetryExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
            Self::Prediction(_) => ErrorKind::Prediction,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the job layer should spend a retry on this error
    ///
    /// Parse failures, cancellations and bookkeeping errors are final: a second
    /// pass through the same pipeline would produce the same result.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. }
                | Self::CircuitOpen { .. }
                | Self::StaleResource(_)
                | Self::FetchFailed { .. }
                | Self::Storage(_)
        )
    }

    pub(crate) fn resource_exhausted(resource: impl Into<String>, waited: Duration) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
            waited,
        }
    }
}

impl From<sqlx::Error> for ScrapeError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} keeps the context chain
        Self::Internal(format!("{err:#}"))
    }
}

/// Convenience alias for Result with `ScrapeError`
pub type ScrapeResult<T> = Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_indices_match_all_table() {
        for (i, kind) in ErrorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i, "{kind} out of place");
        }
    }

    #[test]
    fn parse_and_cancel_are_final() {
        let parse = ScrapeError::ParseFailed {
            payload_ref: "video:v1#00".into(),
            message: "missing stats".into(),
        };
        assert!(!parse.is_retryable());
        assert!(!ScrapeError::Cancelled.is_retryable());
        assert!(
            ScrapeError::FetchFailed {
                attempts: 3,
                message: "503".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::JobRetryExhausted).expect("serialise kind");
        assert_eq!(json, "\"job_retry_exhausted\"");
    }
}
