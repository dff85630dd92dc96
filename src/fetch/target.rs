//! Target classes: independent rate-limit buckets and circuit breakers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of outbound call, each class owns its own bucket and breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    /// JSON/HTTP requests against the platform's API endpoints
    Api,
    /// Full page navigations in a pooled browser
    Navigation,
}

impl TargetClass {
    pub const ALL: [TargetClass; 2] = [Self::Api, Self::Navigation];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Navigation => "navigation",
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
