//! Bot-activity and authenticity scoring

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::engagement::{coefficient_of_variation, engagement_rate};
use super::weights::AuthenticityWeights;
use crate::models::video::RawVideo;

/// Engagement rates above this are implausible without inflation
const IMPLAUSIBLE_ENGAGEMENT_RATE: f64 = 0.5;

/// Likelihood in `[0, 1]` that a video's counters are inflated
///
/// The strongest of: likes exceeding views, an implausible engagement rate,
/// and duplicate comments in the sampled comment set.
#[must_use]
pub fn bot_activity_score(raw: &RawVideo, w: &AuthenticityWeights) -> f64 {
    let stats = &raw.stats;
    if stats.views > 0 && stats.likes > stats.views {
        return 1.0;
    }

    let rate = engagement_rate(stats.engagement(), stats.views);
    let rate_anomaly = if rate > IMPLAUSIBLE_ENGAGEMENT_RATE {
        ((rate - IMPLAUSIBLE_ENGAGEMENT_RATE) / IMPLAUSIBLE_ENGAGEMENT_RATE).min(1.0)
    } else {
        0.0
    };

    let duplicates = duplicate_ratio(&raw.comments_sample);
    let duplicate_anomaly = if w.duplicate_comment_ratio > 0.0 {
        (duplicates / w.duplicate_comment_ratio).min(1.0)
    } else {
        0.0
    };

    rate_anomaly.max(duplicate_anomaly)
}

/// Share of comments that repeat an earlier one (case/whitespace-insensitive)
fn duplicate_ratio(comments: &[String]) -> f64 {
    if comments.len() < 2 {
        return 0.0;
    }
    let unique: HashSet<String> = comments
        .iter()
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .collect();
    1.0 - unique.len() as f64 / comments.len() as f64
}

/// Raw inputs of the account-level authenticity score
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticitySignals {
    pub followers: u64,
    pub following: u64,
    /// Mean engagements per recent post
    pub avg_engagement_per_post: f64,
    /// Variation of the gaps between posts, `None` below three dated posts
    pub posting_interval_cv: Option<f64>,
    pub mean_bot_activity: f64,
}

/// `1 - weighted bot indicators`, in `[0, 1]`
#[must_use]
pub fn authenticity_score(signals: &AuthenticitySignals, w: &AuthenticityWeights) -> f64 {
    let engagement_anomaly = if signals.followers == 0 || w.min_engagement_per_follower <= 0.0 {
        0.0
    } else {
        let per_follower = signals.avg_engagement_per_post / signals.followers as f64;
        if per_follower < w.min_engagement_per_follower {
            1.0 - per_follower / w.min_engagement_per_follower
        } else {
            0.0
        }
    };

    let follow_ratio = if signals.followers == 0 {
        if signals.following > 0 { 1.0 } else { 0.0 }
    } else {
        let ratio = signals.following as f64 / signals.followers as f64;
        if ratio > w.suspicious_follow_ratio {
            ((ratio - w.suspicious_follow_ratio) / w.suspicious_follow_ratio).min(1.0)
        } else {
            0.0
        }
    };

    let timing = match signals.posting_interval_cv {
        Some(cv) if w.regular_interval_cv > 0.0 && cv < w.regular_interval_cv => {
            1.0 - cv / w.regular_interval_cv
        }
        _ => 0.0,
    };

    let total = w.engagement_anomaly + w.follow_ratio + w.timing_regularity + w.bot_activity;
    if total <= 0.0 {
        return 1.0;
    }
    let penalty = (w.engagement_anomaly * engagement_anomaly
        + w.follow_ratio * follow_ratio
        + w.timing_regularity * timing
        + w.bot_activity * signals.mean_bot_activity.clamp(0.0, 1.0))
        / total;
    (1.0 - penalty).clamp(0.0, 1.0)
}

/// Coefficient of variation of the gaps between consecutive posts
#[must_use]
pub fn posting_interval_cv(timestamps: &[DateTime<Utc>]) -> Option<f64> {
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    let gaps: Vec<f64> = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds() as f64)
        .collect();
    coefficient_of_variation(&gaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::video::VideoStats;
    use chrono::Duration;

    #[test]
    fn likes_above_views_is_certain_bot() {
        let raw = RawVideo {
            stats: VideoStats {
                views: 100,
                likes: 150,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(bot_activity_score(&raw, &AuthenticityWeights::default()), 1.0);
    }

    #[test]
    fn duplicate_comments_raise_bot_score() {
        let raw = RawVideo {
            stats: VideoStats {
                views: 10_000,
                likes: 500,
                ..Default::default()
            },
            comments_sample: vec![
                "Nice video!".into(),
                "nice   video!".into(),
                "NICE VIDEO!".into(),
                "where is this?".into(),
            ],
            ..Default::default()
        };
        let score = bot_activity_score(&raw, &AuthenticityWeights::default());
        assert!(score > 0.9, "{score}");
    }

    #[test]
    fn organic_account_scores_high() {
        let signals = AuthenticitySignals {
            followers: 10_000,
            following: 300,
            avg_engagement_per_post: 800.0,
            posting_interval_cv: Some(0.8),
            mean_bot_activity: 0.0,
        };
        assert_eq!(authenticity_score(&signals, &AuthenticityWeights::default()), 1.0);
    }

    #[test]
    fn farmed_account_scores_low() {
        let signals = AuthenticitySignals {
            followers: 100_000,
            following: 500_000,
            avg_engagement_per_post: 10.0,
            posting_interval_cv: Some(0.0),
            mean_bot_activity: 0.6,
        };
        let score = authenticity_score(&signals, &AuthenticityWeights::default());
        assert!(score < 0.2, "{score}");
    }

    #[test]
    fn clockwork_posting_has_zero_cv() {
        let start = Utc::now();
        let stamps: Vec<_> = (0..5).map(|i| start + Duration::hours(24 * i)).collect();
        assert_eq!(posting_interval_cv(&stamps), Some(0.0));
        assert_eq!(posting_interval_cv(&stamps[..2]), None);
    }
}
