//! Typed completion events
//!
//! Workers publish [`ScrapeEvent`]s on the [`EventBus`]; the webhook
//! notifier and any embedding application subscribe to it.

pub mod bus;
pub mod webhook;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::{JobError, TargetType};

pub use bus::EventBus;
pub use webhook::WebhookNotifier;

/// Wire shape: `{"event": "job.completed" | "job.failed", "jobId", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ScrapeEvent {
    #[serde(rename = "job.completed", rename_all = "camelCase")]
    JobCompleted {
        job_id: Uuid,
        target_type: TargetType,
        target_key: String,
        result: serde_json::Value,
        duration_ms: u64,
    },
    #[serde(rename = "job.failed", rename_all = "camelCase")]
    JobFailed {
        job_id: Uuid,
        target_type: TargetType,
        target_key: String,
        error: JobError,
        duration_ms: u64,
    },
}

impl ScrapeEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobCompleted { .. } => "job.completed",
            Self::JobFailed { .. } => "job.failed",
        }
    }

    #[must_use]
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobCompleted { job_id, .. } | Self::JobFailed { job_id, .. } => *job_id,
        }
    }
}
