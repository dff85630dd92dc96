//! Job records and their status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorKind, ScrapeError, ScrapeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Profile,
    Video,
    Trend,
    Hashtag,
}

impl TargetType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Video => "video",
            Self::Trend => "trend",
            Self::Hashtag => "hashtag",
        }
    }

    /// Entity type segment of the cache key (`scrape:user:<id>`)
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::Profile => "user",
            Self::Video => "video",
            Self::Trend => "trend",
            Self::Hashtag => "hashtag",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" | "user" => Ok(Self::Profile),
            "video" => Ok(Self::Video),
            "trend" | "sound" => Ok(Self::Trend),
            "hashtag" | "tag" => Ok(Self::Hashtag),
            other => Err(ScrapeError::Config(format!("unknown target type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only: `Pending -> InProgress -> {Completed, Failed}`
    ///
    /// A pending job may also fail directly (cancelled before it started).
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ScrapeError::Storage(format!("unknown job status '{other}'"))),
        }
    }
}

/// Per-job knobs supplied at enqueue time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Job-level retry budget; the configured default when unset
    pub max_retries: Option<u32>,
    /// Skip the cache lookup and overwrite the cached entry
    pub bypass_cache: bool,
    /// Profiles: also fetch the recent post list
    pub include_videos: bool,
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub target_type: TargetType,
    pub target_key: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobRequest {
    #[must_use]
    pub fn new(target_type: TargetType, target_key: impl Into<String>) -> Self {
        Self {
            target_type,
            target_key: target_key.into(),
            priority: 0,
            options: JobOptions::default(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Structured failure carried on the job and on `job.failed` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ScrapeError> for JobError {
    fn from(err: &ScrapeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJob {
    pub id: Uuid,
    pub target_type: TargetType,
    pub target_key: String,
    pub priority: i32,
    /// Job-level retries spent so far
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
    pub status: JobStatus,
    pub options: JobOptions,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last failure; on a completed job, the last retried error
    pub error: Option<JobError>,
    pub result: Option<serde_json::Value>,
}

impl ScrapeJob {
    #[must_use]
    pub fn new(request: JobRequest, default_max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_type: request.target_type,
            target_key: request.target_key,
            priority: request.priority,
            retry_count: 0,
            max_retries: request.options.max_retries.unwrap_or(default_max_retries),
            enqueued_at: Utc::now(),
            status: JobStatus::Pending,
            options: request.options,
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        }
    }

    /// Move to `next`, stamping start/finish times
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for anything but a forward move.
    pub fn transition(&mut self, next: JobStatus) -> ScrapeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ScrapeError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            JobStatus::InProgress => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => self.finished_at = Some(now),
            JobStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}", self.target_type, self.target_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only() {
        use JobStatus::*;
        let all = [Pending, InProgress, Completed, Failed];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Pending, InProgress) | (Pending, Failed) | (InProgress, Completed) | (InProgress, Failed)
                );
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_jobs_stay_terminal() {
        let mut job = ScrapeJob::new(JobRequest::new(TargetType::Video, "v1"), 2);
        job.transition(JobStatus::InProgress).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        let err = job.transition(JobStatus::Failed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn options_override_retry_budget() {
        let request = JobRequest::new(TargetType::Profile, "baker").with_options(JobOptions {
            max_retries: Some(5),
            ..Default::default()
        });
        assert_eq!(ScrapeJob::new(request, 2).max_retries, 5);
        assert_eq!(ScrapeJob::new(JobRequest::new(TargetType::Trend, "s"), 2).max_retries, 2);
    }

    #[test]
    fn target_type_parsing() {
        assert_eq!("user".parse::<TargetType>().unwrap(), TargetType::Profile);
        assert_eq!("Hashtag".parse::<TargetType>().unwrap(), TargetType::Hashtag);
        assert!("album".parse::<TargetType>().is_err());
        assert_eq!(TargetType::Profile.entity_type(), "user");
    }
}
