//! Scraped entities
//!
//! Every entity pairs the raw fields of one snapshot with analytics derived
//! from them. Analytics are private and only produced by `from_raw`, so the
//! stored score always equals the scoring function applied to the stored raw
//! fields; `verify` recomputes and compares.

pub mod competitor;
pub mod profile;
pub mod trend;
pub mod video;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use competitor::CompetitorAnalysis;
pub use profile::{ProfileAnalytics, RawProfile, UserProfile};
pub use trend::{HashtagTrend, RawHashtag, RawSoundTrend, SoundTrend, TrendAnalytics};
pub use video::{RawVideo, StatsSample, TemporalPatterns, TimePoint, Video, VideoAnalytics, VideoStats, ViralIndicators};

/// Age bucket of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFreshness {
    /// Under five minutes old
    Live,
    /// Under a day old
    Recent,
    Stale,
}

impl DataFreshness {
    #[must_use]
    pub fn from_age(scraped_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now - scraped_at;
        if age < Duration::minutes(5) {
            Self::Live
        } else if age < Duration::hours(24) {
            Self::Recent
        } else {
            Self::Stale
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub scraped_at: DateTime<Utc>,
    pub data_freshness: DataFreshness,
    /// Share of optional raw fields present in the snapshot, `[0, 1]`
    pub confidence_score: f64,
}

impl SnapshotMetadata {
    #[must_use]
    pub fn new(scraped_at: DateTime<Utc>, confidence_score: f64) -> Self {
        Self {
            scraped_at,
            data_freshness: DataFreshness::Live,
            confidence_score: confidence_score.clamp(0.0, 1.0),
        }
    }

    /// Re-bucket the snapshot age, e.g. when serving it from cache
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.data_freshness = DataFreshness::from_age(self.scraped_at, now);
    }
}

/// Fraction of `checks` that hold
pub(crate) fn completeness(checks: &[bool]) -> f64 {
    if checks.is_empty() {
        return 1.0;
    }
    checks.iter().filter(|present| **present).count() as f64 / checks.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_buckets() {
        let now = Utc::now();
        assert_eq!(DataFreshness::from_age(now - Duration::seconds(30), now), DataFreshness::Live);
        assert_eq!(DataFreshness::from_age(now - Duration::hours(2), now), DataFreshness::Recent);
        assert_eq!(DataFreshness::from_age(now - Duration::days(3), now), DataFreshness::Stale);
    }

    #[test]
    fn refresh_rebuckets() {
        let now = Utc::now();
        let mut meta = SnapshotMetadata::new(now - Duration::hours(30), 0.5);
        assert_eq!(meta.data_freshness, DataFreshness::Live);
        meta.refresh(now);
        assert_eq!(meta.data_freshness, DataFreshness::Stale);
    }
}
