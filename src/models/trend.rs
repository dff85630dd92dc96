//! Sound and hashtag trends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SnapshotMetadata, completeness};
use crate::scoring::lifecycle::{self, TrendLifecycle};
use crate::scoring::weights::ScoringWeights;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSoundTrend {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub duration_secs: Option<f64>,
    pub original: bool,
    /// Lifetime number of videos using the sound
    pub usage_count: u64,
    /// New videos per period, oldest first
    pub usage_history: Vec<u64>,
    pub top_video_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawHashtag {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub view_count: u64,
    pub video_count: u64,
    /// New videos per period, oldest first
    pub usage_history: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalytics {
    pub growth_rate: f64,
    pub lifecycle: TrendLifecycle,
    pub peak_usage: u64,
    pub latest_usage: u64,
}

impl TrendAnalytics {
    #[must_use]
    pub fn from_history(history: &[u64], weights: &ScoringWeights) -> Self {
        Self {
            growth_rate: lifecycle::growth_rate(history),
            lifecycle: lifecycle::classify(history, &weights.lifecycle),
            peak_usage: history.iter().copied().max().unwrap_or(0),
            latest_usage: history.last().copied().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundTrend {
    #[serde(flatten)]
    raw: RawSoundTrend,
    analytics: TrendAnalytics,
    metadata: SnapshotMetadata,
}

impl SoundTrend {
    #[must_use]
    pub fn from_raw(raw: RawSoundTrend, weights: &ScoringWeights, scraped_at: DateTime<Utc>) -> Self {
        let analytics = TrendAnalytics::from_history(&raw.usage_history, weights);
        let confidence = completeness(&[
            raw.author.is_some(),
            raw.duration_secs.is_some(),
            raw.usage_history.len() >= 2,
            !raw.top_video_ids.is_empty(),
        ]);
        Self {
            raw,
            analytics,
            metadata: SnapshotMetadata::new(scraped_at, confidence),
        }
    }

    #[must_use]
    pub fn verify(&self, weights: &ScoringWeights) -> bool {
        TrendAnalytics::from_history(&self.raw.usage_history, weights) == self.analytics
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    #[must_use]
    pub fn raw(&self) -> &RawSoundTrend {
        &self.raw
    }

    #[must_use]
    pub fn analytics(&self) -> &TrendAnalytics {
        &self.analytics
    }

    #[must_use]
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn refresh_freshness(&mut self, now: DateTime<Utc>) {
        self.metadata.refresh(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashtagTrend {
    #[serde(flatten)]
    raw: RawHashtag,
    analytics: TrendAnalytics,
    views_per_video: f64,
    metadata: SnapshotMetadata,
}

impl HashtagTrend {
    #[must_use]
    pub fn from_raw(raw: RawHashtag, weights: &ScoringWeights, scraped_at: DateTime<Utc>) -> Self {
        let analytics = TrendAnalytics::from_history(&raw.usage_history, weights);
        let views_per_video = views_per_video(&raw);
        let confidence = completeness(&[
            raw.description.is_some(),
            raw.view_count > 0,
            raw.usage_history.len() >= 2,
        ]);
        Self {
            raw,
            analytics,
            views_per_video,
            metadata: SnapshotMetadata::new(scraped_at, confidence),
        }
    }

    #[must_use]
    pub fn verify(&self, weights: &ScoringWeights) -> bool {
        TrendAnalytics::from_history(&self.raw.usage_history, weights) == self.analytics
            && views_per_video(&self.raw) == self.views_per_video
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.raw.name
    }

    #[must_use]
    pub fn raw(&self) -> &RawHashtag {
        &self.raw
    }

    #[must_use]
    pub fn analytics(&self) -> &TrendAnalytics {
        &self.analytics
    }

    #[must_use]
    pub fn views_per_video(&self) -> f64 {
        self.views_per_video
    }

    #[must_use]
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn refresh_freshness(&mut self, now: DateTime<Utc>) {
        self.metadata.refresh(now);
    }
}

fn views_per_video(raw: &RawHashtag) -> f64 {
    if raw.video_count == 0 {
        0.0
    } else {
        raw.view_count as f64 / raw.video_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_lifecycle_from_history() {
        let raw = RawSoundTrend {
            id: "s1".into(),
            title: "original sound".into(),
            usage_history: vec![100, 800, 2_000],
            ..Default::default()
        };
        let trend = SoundTrend::from_raw(raw, &ScoringWeights::default(), Utc::now());
        assert_eq!(trend.analytics().lifecycle, TrendLifecycle::Rising);
        assert_eq!(trend.analytics().peak_usage, 2_000);
        assert_eq!(trend.analytics().growth_rate, 1.5);
    }

    #[test]
    fn hashtag_views_per_video() {
        let raw = RawHashtag {
            id: "h1".into(),
            name: "dance".into(),
            view_count: 1_000_000,
            video_count: 400,
            ..Default::default()
        };
        let tag = HashtagTrend::from_raw(raw, &ScoringWeights::default(), Utc::now());
        assert_eq!(tag.views_per_video(), 2_500.0);
        assert_eq!(tag.analytics().lifecycle, TrendLifecycle::Emerging);
        assert!(tag.verify(&ScoringWeights::default()));
    }
}
