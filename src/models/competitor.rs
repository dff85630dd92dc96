use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::profile::UserProfile;

/// Own metric, competitor metric and the gap between them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDiff {
    pub own: f64,
    pub competitor: f64,
    /// `own - competitor`
    pub delta: f64,
}

impl MetricDiff {
    fn new(own: f64, competitor: f64) -> Self {
        Self {
            own,
            competitor,
            delta: own - competitor,
        }
    }
}

/// Side-by-side comparison of two scored profiles
///
/// Built only by [`CompetitorAnalysis::compare`]; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorAnalysis {
    own_id: String,
    competitor_id: String,
    followers: MetricDiff,
    engagement_rate: MetricDiff,
    virality_score: MetricDiff,
    authenticity_score: MetricDiff,
    audience_quality: MetricDiff,
    commercial_value: MetricDiff,
    posting_frequency_per_week: MetricDiff,
    content_consistency: MetricDiff,
    shared_hashtags: Vec<String>,
    competitor_only_hashtags: Vec<String>,
    /// Metrics where the own account is ahead
    advantages: Vec<String>,
    generated_at: DateTime<Utc>,
}

impl CompetitorAnalysis {
    #[must_use]
    pub fn compare(own: &UserProfile, competitor: &UserProfile) -> Self {
        let (a, b) = (own.analytics(), competitor.analytics());
        let metrics = [
            (
                "followers",
                MetricDiff::new(own.raw().follower_count as f64, competitor.raw().follower_count as f64),
            ),
            ("engagementRate", MetricDiff::new(a.engagement_rate, b.engagement_rate)),
            ("viralityScore", MetricDiff::new(a.virality_score, b.virality_score)),
            ("authenticityScore", MetricDiff::new(a.authenticity_score, b.authenticity_score)),
            ("audienceQuality", MetricDiff::new(a.audience_quality, b.audience_quality)),
            ("commercialValue", MetricDiff::new(a.commercial_value, b.commercial_value)),
            (
                "postingFrequencyPerWeek",
                MetricDiff::new(a.posting_frequency_per_week, b.posting_frequency_per_week),
            ),
            ("contentConsistency", MetricDiff::new(a.content_consistency, b.content_consistency)),
        ];
        let advantages = metrics
            .iter()
            .filter(|(_, diff)| diff.delta > 0.0)
            .map(|(name, _)| (*name).to_string())
            .collect();

        let own_tags = hashtags(own);
        let their_tags = hashtags(competitor);

        Self {
            own_id: own.id().to_string(),
            competitor_id: competitor.id().to_string(),
            followers: metrics[0].1,
            engagement_rate: metrics[1].1,
            virality_score: metrics[2].1,
            authenticity_score: metrics[3].1,
            audience_quality: metrics[4].1,
            commercial_value: metrics[5].1,
            posting_frequency_per_week: metrics[6].1,
            content_consistency: metrics[7].1,
            shared_hashtags: own_tags.intersection(&their_tags).cloned().collect(),
            competitor_only_hashtags: their_tags.difference(&own_tags).cloned().collect(),
            advantages,
            // the later snapshot of the two
            generated_at: own.metadata().scraped_at.max(competitor.metadata().scraped_at),
        }
    }

    #[must_use]
    pub fn competitor_id(&self) -> &str {
        &self.competitor_id
    }

    #[must_use]
    pub fn engagement_rate(&self) -> MetricDiff {
        self.engagement_rate
    }

    #[must_use]
    pub fn followers(&self) -> MetricDiff {
        self.followers
    }

    #[must_use]
    pub fn shared_hashtags(&self) -> &[String] {
        &self.shared_hashtags
    }

    #[must_use]
    pub fn competitor_only_hashtags(&self) -> &[String] {
        &self.competitor_only_hashtags
    }

    #[must_use]
    pub fn advantages(&self) -> &[String] {
        &self.advantages
    }
}

fn hashtags(profile: &UserProfile) -> BTreeSet<String> {
    profile
        .raw()
        .recent_videos
        .iter()
        .flat_map(|v| v.hashtags.iter())
        .map(|t| t.trim_start_matches('#').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::RawProfile;
    use crate::models::video::{RawVideo, VideoStats};
    use crate::scoring::weights::ScoringWeights;

    fn profile(id: &str, followers: u64, likes: u64, tags: &[&str]) -> UserProfile {
        let raw = RawProfile {
            id: id.into(),
            handle: id.into(),
            follower_count: followers,
            recent_videos: vec![RawVideo {
                id: format!("{id}-v"),
                stats: VideoStats {
                    views: 10_000,
                    likes,
                    ..Default::default()
                },
                hashtags: tags.iter().map(|t| (*t).to_string()).collect(),
                ..Default::default()
            }],
            ..Default::default()
        };
        UserProfile::from_raw(raw, &ScoringWeights::default(), Utc::now())
    }

    #[test]
    fn compare_reports_gaps_and_hashtags() {
        let own = profile("me", 5_000, 1_000, &["#Baking", "bread"]);
        let rival = profile("them", 50_000, 200, &["baking", "cake"]);
        let analysis = CompetitorAnalysis::compare(&own, &rival);

        assert_eq!(analysis.followers().delta, -45_000.0);
        assert!(analysis.engagement_rate().delta > 0.0);
        assert!(analysis.advantages().contains(&"engagementRate".to_string()));
        assert!(!analysis.advantages().contains(&"followers".to_string()));
        assert_eq!(analysis.shared_hashtags(), ["baking"]);
        assert_eq!(analysis.competitor_only_hashtags(), ["cake"]);
    }
}
