use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::{SnapshotMetadata, completeness};
use crate::scoring::weights::ScoringWeights;
use crate::scoring::{authenticity, engagement, sentiment, virality};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoStats {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub saves: u64,
}

impl VideoStats {
    /// likes + comments + shares + saves
    #[must_use]
    pub fn engagement(&self) -> u64 {
        self.likes
            .saturating_add(self.comments)
            .saturating_add(self.shares)
            .saturating_add(self.saves)
    }
}

/// Counter observation at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSample {
    pub at: DateTime<Utc>,
    pub views: u64,
    pub engagement: u64,
}

/// Video fields as scraped
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawVideo {
    pub id: String,
    pub author_id: Option<String>,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub stats: VideoStats,
    pub avg_watch_time_secs: Option<f64>,
    pub cross_platform_shares: u64,
    pub hashtags: Vec<String>,
    pub comments_sample: Vec<String>,
    /// Earlier counter observations, oldest first
    pub history: Vec<StatsSample>,
}

impl RawVideo {
    fn completeness(&self) -> f64 {
        completeness(&[
            self.author_id.is_some(),
            self.created_at.is_some(),
            self.duration_secs.is_some(),
            self.avg_watch_time_secs.is_some(),
            !self.comments_sample.is_empty(),
            !self.history.is_empty(),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnalytics {
    pub engagement_rate: f64,
    pub completion_rate: f64,
    pub view_velocity: f64,
    pub virality_coefficient: f64,
    pub sentiment_score: f64,
    pub bot_activity_score: f64,
}

/// Flags derived from the virality components
///
/// `is_viral` is exactly `virality_coefficient >= viral_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViralIndicators {
    pub is_viral: bool,
    pub rapid_growth: bool,
    pub high_share_ratio: bool,
    pub cross_platform_spread: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalPatterns {
    pub views: Vec<TimePoint>,
    pub engagement: Vec<TimePoint>,
    /// UTC hour with the largest view gain between samples
    pub peak_hour_utc: Option<u32>,
    /// Change in views/hour between the last two sample intervals
    pub acceleration: f64,
}

impl TemporalPatterns {
    fn from_history(history: &[StatsSample]) -> Self {
        let views = history
            .iter()
            .map(|s| TimePoint {
                at: s.at,
                value: s.views as f64,
            })
            .collect();
        let engagement = history
            .iter()
            .map(|s| TimePoint {
                at: s.at,
                value: s.engagement as f64,
            })
            .collect();

        // (end of interval, views/hour, raw gain)
        let rates: Vec<(DateTime<Utc>, f64, u64)> = history
            .windows(2)
            .filter_map(|pair| {
                let hours = (pair[1].at - pair[0].at).num_seconds() as f64 / 3_600.0;
                let gain = pair[1].views.saturating_sub(pair[0].views);
                (hours > 0.0).then(|| (pair[1].at, gain as f64 / hours, gain))
            })
            .collect();

        let peak_hour_utc = rates
            .iter()
            .max_by_key(|(_, _, gain)| *gain)
            .map(|(at, _, _)| at.hour());
        let acceleration = match rates.as_slice() {
            [.., (_, prev, _), (_, last, _)] => last - prev,
            _ => 0.0,
        };

        Self {
            views,
            engagement,
            peak_hour_utc,
            acceleration,
        }
    }
}

/// A scored video snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(flatten)]
    raw: RawVideo,
    analytics: VideoAnalytics,
    viral_indicators: ViralIndicators,
    temporal_patterns: TemporalPatterns,
    metadata: SnapshotMetadata,
}

impl Video {
    #[must_use]
    pub fn from_raw(raw: RawVideo, weights: &ScoringWeights, scraped_at: DateTime<Utc>) -> Self {
        let (analytics, viral_indicators) = score(&raw, weights, scraped_at);
        let temporal_patterns = TemporalPatterns::from_history(&raw.history);
        let metadata = SnapshotMetadata::new(scraped_at, raw.completeness());
        Self {
            raw,
            analytics,
            viral_indicators,
            temporal_patterns,
            metadata,
        }
    }

    /// Recompute from the stored raw fields and compare
    #[must_use]
    pub fn verify(&self, weights: &ScoringWeights) -> bool {
        let (analytics, indicators) = score(&self.raw, weights, self.metadata.scraped_at);
        analytics == self.analytics
            && indicators == self.viral_indicators
            && TemporalPatterns::from_history(&self.raw.history) == self.temporal_patterns
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    #[must_use]
    pub fn raw(&self) -> &RawVideo {
        &self.raw
    }

    #[must_use]
    pub fn stats(&self) -> &VideoStats {
        &self.raw.stats
    }

    #[must_use]
    pub fn analytics(&self) -> &VideoAnalytics {
        &self.analytics
    }

    #[must_use]
    pub fn viral_indicators(&self) -> &ViralIndicators {
        &self.viral_indicators
    }

    #[must_use]
    pub fn temporal_patterns(&self) -> &TemporalPatterns {
        &self.temporal_patterns
    }

    #[must_use]
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn refresh_freshness(&mut self, now: DateTime<Utc>) {
        self.metadata.refresh(now);
    }
}

fn score(
    raw: &RawVideo,
    weights: &ScoringWeights,
    observed_at: DateTime<Utc>,
) -> (VideoAnalytics, ViralIndicators) {
    let w = &weights.virality;
    let components = virality::components(raw, observed_at, w);
    let coefficient = components.coefficient(w);

    let analytics = VideoAnalytics {
        engagement_rate: engagement::engagement_rate(raw.stats.engagement(), raw.stats.views),
        completion_rate: engagement::completion_rate(raw.avg_watch_time_secs, raw.duration_secs),
        view_velocity: virality::view_velocity(raw, observed_at),
        virality_coefficient: coefficient,
        sentiment_score: sentiment::sentiment_score(&raw.comments_sample),
        bot_activity_score: authenticity::bot_activity_score(raw, &weights.authenticity),
    };
    let indicators = ViralIndicators {
        is_viral: virality::is_viral(coefficient, w),
        rapid_growth: components.velocity >= w.viral_threshold,
        high_share_ratio: components.share_ratio >= w.viral_threshold,
        cross_platform_spread: components.cross_platform >= w.viral_threshold,
    };
    (analytics, indicators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(at: DateTime<Utc>, views: u64) -> StatsSample {
        StatsSample {
            at,
            views,
            engagement: views / 10,
        }
    }

    #[test]
    fn temporal_patterns_from_history() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let raw = RawVideo {
            id: "v1".into(),
            stats: VideoStats {
                views: 9_000,
                ..Default::default()
            },
            history: vec![
                sample(t0, 1_000),
                sample(t0 + Duration::hours(1), 2_000),
                sample(t0 + Duration::hours(2), 6_000),
                sample(t0 + Duration::hours(3), 9_000),
            ],
            ..Default::default()
        };
        let video = Video::from_raw(raw, &ScoringWeights::default(), t0 + Duration::hours(3));
        let patterns = video.temporal_patterns();
        assert_eq!(patterns.views.len(), 4);
        assert_eq!(patterns.peak_hour_utc, Some(12));
        assert_eq!(patterns.acceleration, -1_000.0);
        assert_eq!(video.analytics().view_velocity, 3_000.0);
    }

    #[test]
    fn json_round_trip_still_verifies() {
        let now = Utc::now();
        let raw = RawVideo {
            id: "v9".into(),
            created_at: Some(now - Duration::hours(5)),
            stats: VideoStats {
                views: 123_457,
                likes: 9_876,
                comments: 321,
                shares: 777,
                saves: 55,
            },
            comments_sample: vec!["love it".into()],
            ..Default::default()
        };
        let weights = ScoringWeights::default();
        let video = Video::from_raw(raw, &weights, now);
        let json = serde_json::to_string(&video).unwrap();
        let back: Video = serde_json::from_str(&json).unwrap();
        assert_eq!(back, video);
        assert!(back.verify(&weights));
    }

    #[test]
    fn is_viral_tracks_threshold() {
        let now = Utc::now();
        let raw = RawVideo {
            id: "v2".into(),
            created_at: Some(now - Duration::hours(2)),
            stats: VideoStats {
                views: 50_000,
                shares: 1_000,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut weights = ScoringWeights::default();
        let video = Video::from_raw(raw.clone(), &weights, now);
        let c = video.analytics().virality_coefficient;
        assert_eq!(video.viral_indicators().is_viral, c >= weights.virality.viral_threshold);

        weights.virality.viral_threshold = c;
        assert!(Video::from_raw(raw, &weights, now).viral_indicators().is_viral);
    }
}
