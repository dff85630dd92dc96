use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::video::RawVideo;
use super::{SnapshotMetadata, completeness};
use crate::scoring::audience::{self, BrandSafety};
use crate::scoring::authenticity::{self, AuthenticitySignals};
use crate::scoring::engagement;
use crate::scoring::prediction::Prediction;
use crate::scoring::virality;
use crate::scoring::weights::ScoringWeights;

/// Profile fields as scraped, including a sample of recent posts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawProfile {
    pub id: String,
    pub handle: String,
    pub nickname: Option<String>,
    pub bio: Option<String>,
    pub region: Option<String>,
    pub verified: bool,
    pub follower_count: u64,
    pub following_count: u64,
    pub heart_count: u64,
    pub video_count: u64,
    pub recent_videos: Vec<RawVideo>,
}

impl RawProfile {
    fn completeness(&self) -> f64 {
        completeness(&[
            self.nickname.is_some(),
            self.bio.is_some(),
            self.region.is_some(),
            self.follower_count > 0,
            !self.recent_videos.is_empty(),
            !self.recent_videos.is_empty() && self.recent_videos.iter().all(|v| v.created_at.is_some()),
        ])
    }

    fn post_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.recent_videos.iter().filter_map(|v| v.created_at).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAnalytics {
    pub engagement_rate: f64,
    /// Mean virality coefficient of the recent posts
    pub virality_score: f64,
    pub authenticity_score: f64,
    pub audience_quality: f64,
    /// Estimated USD value of one sponsored post
    pub commercial_value: f64,
    pub brand_safety: BrandSafety,
    pub content_consistency: f64,
    pub posting_frequency_per_week: f64,
    pub avg_views_per_post: f64,
}

impl ProfileAnalytics {
    fn compute(raw: &RawProfile, weights: &ScoringWeights, observed_at: DateTime<Utc>) -> Self {
        let videos = &raw.recent_videos;
        let posts = videos.len() as f64;

        let total_views: u64 = videos.iter().map(|v| v.stats.views).sum();
        let total_engagement: u64 = videos.iter().map(|v| v.stats.engagement()).sum();
        let total_likes: u64 = videos.iter().map(|v| v.stats.likes).sum();
        let total_comments: u64 = videos.iter().map(|v| v.stats.comments).sum();
        let engagement_rate = engagement::engagement_rate(total_engagement, total_views);

        let (avg_views_per_post, avg_engagement_per_post) = if videos.is_empty() {
            (0.0, 0.0)
        } else {
            (total_views as f64 / posts, total_engagement as f64 / posts)
        };

        let virality_score = if videos.is_empty() {
            0.0
        } else {
            videos
                .iter()
                .map(|v| virality::components(v, observed_at, &weights.virality).coefficient(&weights.virality))
                .sum::<f64>()
                / posts
        };

        let mean_bot_activity = if videos.is_empty() {
            0.0
        } else {
            videos
                .iter()
                .map(|v| authenticity::bot_activity_score(v, &weights.authenticity))
                .sum::<f64>()
                / posts
        };

        let timestamps = raw.post_timestamps();
        let signals = AuthenticitySignals {
            followers: raw.follower_count,
            following: raw.following_count,
            avg_engagement_per_post,
            posting_interval_cv: authenticity::posting_interval_cv(&timestamps),
            mean_bot_activity,
        };
        let authenticity_score = authenticity::authenticity_score(&signals, &weights.authenticity);

        let audience_quality = audience::audience_quality(
            authenticity_score,
            engagement_rate,
            total_comments,
            total_likes,
            &weights.audience,
        );
        let commercial_value = audience::commercial_value(
            avg_views_per_post,
            engagement_rate,
            audience_quality,
            &weights.commercial,
        );

        let texts = raw
            .bio
            .iter()
            .map(String::as_str)
            .chain(videos.iter().map(|v| v.description.as_str()))
            .chain(videos.iter().flat_map(|v| v.hashtags.iter().map(String::as_str)));
        let brand_safety = audience::brand_safety(texts, &weights.brand_safety);

        let per_post_views: Vec<f64> = videos.iter().map(|v| v.stats.views as f64).collect();

        Self {
            engagement_rate,
            virality_score,
            authenticity_score,
            audience_quality,
            commercial_value,
            brand_safety,
            content_consistency: engagement::content_consistency(&per_post_views),
            posting_frequency_per_week: posting_frequency(&timestamps),
            avg_views_per_post,
        }
    }
}

/// Posts per week across the span of the dated posts
fn posting_frequency(timestamps: &[DateTime<Utc>]) -> f64 {
    let (Some(first), Some(last)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return 0.0;
    };
    let weeks = (*last - *first).num_seconds() as f64 / (7.0 * 86_400.0);
    if weeks <= 0.0 {
        return 0.0;
    }
    (timestamps.len() - 1) as f64 / weeks
}

/// A scored profile snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    raw: RawProfile,
    analytics: ProfileAnalytics,
    /// Output of the external prediction capability, if it was consulted
    #[serde(default)]
    predictions: Option<Prediction>,
    metadata: SnapshotMetadata,
}

impl UserProfile {
    #[must_use]
    pub fn from_raw(raw: RawProfile, weights: &ScoringWeights, scraped_at: DateTime<Utc>) -> Self {
        let analytics = ProfileAnalytics::compute(&raw, weights, scraped_at);
        let metadata = SnapshotMetadata::new(scraped_at, raw.completeness());
        Self {
            raw,
            analytics,
            predictions: None,
            metadata,
        }
    }

    #[must_use]
    pub fn verify(&self, weights: &ScoringWeights) -> bool {
        ProfileAnalytics::compute(&self.raw, weights, self.metadata.scraped_at) == self.analytics
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    #[must_use]
    pub fn handle(&self) -> &str {
        &self.raw.handle
    }

    #[must_use]
    pub fn raw(&self) -> &RawProfile {
        &self.raw
    }

    #[must_use]
    pub fn analytics(&self) -> &ProfileAnalytics {
        &self.analytics
    }

    #[must_use]
    pub fn predictions(&self) -> Option<&Prediction> {
        self.predictions.as_ref()
    }

    /// Attach a prediction computed from this snapshot's feature vector
    pub fn attach_prediction(&mut self, prediction: Prediction) {
        self.predictions = Some(prediction);
    }

    #[must_use]
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn refresh_freshness(&mut self, now: DateTime<Utc>) {
        self.metadata.refresh(now);
    }

    /// Merge a separately fetched post list into the raw snapshot and rescore
    #[must_use]
    pub fn with_videos(self, videos: Vec<RawVideo>, weights: &ScoringWeights) -> Self {
        let mut raw = self.raw;
        raw.recent_videos = videos;
        Self::from_raw(raw, weights, self.metadata.scraped_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::video::VideoStats;
    use chrono::Duration;

    fn video(id: &str, views: u64, likes: u64, comments: u64, created_at: DateTime<Utc>) -> RawVideo {
        RawVideo {
            id: id.into(),
            created_at: Some(created_at),
            stats: VideoStats {
                views,
                likes,
                comments,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn profile(now: DateTime<Utc>) -> RawProfile {
        RawProfile {
            id: "u1".into(),
            handle: "baker".into(),
            bio: Some("sourdough every day".into()),
            follower_count: 20_000,
            following_count: 150,
            recent_videos: vec![
                video("a", 10_000, 900, 100, now - Duration::days(9)),
                video("b", 12_000, 1_000, 200, now - Duration::days(5)),
                video("c", 8_000, 500, 100, now - Duration::days(2)),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn engagement_rate_is_total_over_views() {
        let now = Utc::now();
        let p = UserProfile::from_raw(profile(now), &ScoringWeights::default(), now);
        assert!((p.analytics().engagement_rate - 2_800.0 / 30_000.0).abs() < 1e-12);
        assert_eq!(p.analytics().avg_views_per_post, 10_000.0);
        assert!(p.analytics().brand_safety.flagged_terms.is_empty());
        assert!((p.analytics().posting_frequency_per_week - 2.0 / 1.0).abs() < 1e-9);
        assert!(p.verify(&ScoringWeights::default()));
    }

    #[test]
    fn empty_profile_scores_zero() {
        let now = Utc::now();
        let raw = RawProfile {
            id: "u2".into(),
            handle: "ghost".into(),
            ..Default::default()
        };
        let p = UserProfile::from_raw(raw, &ScoringWeights::default(), now);
        assert_eq!(p.analytics().engagement_rate, 0.0);
        assert_eq!(p.analytics().virality_score, 0.0);
        assert_eq!(p.analytics().commercial_value, 0.0);
        assert_eq!(p.metadata().confidence_score, 0.0);
    }

    #[test]
    fn with_videos_rescores() {
        let now = Utc::now();
        let mut raw = profile(now);
        let videos = std::mem::take(&mut raw.recent_videos);
        let weights = ScoringWeights::default();
        let bare = UserProfile::from_raw(raw, &weights, now);
        assert_eq!(bare.analytics().engagement_rate, 0.0);
        let full = bare.with_videos(videos, &weights);
        assert!(full.analytics().engagement_rate > 0.0);
        assert!(full.verify(&weights));
    }
}
