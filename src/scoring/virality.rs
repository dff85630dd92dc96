//! Virality coefficient
//!
//! Three components, each normalised to `[0, 1]`, combined with the
//! configured weights and divided by their sum:
//!
//! - view velocity (views per hour), log-scaled against a reference velocity
//! - share-to-view ratio, linear up to a cap
//! - cross-platform shares, log-scaled against a reference count

use chrono::{DateTime, Utc};

use super::weights::ViralityWeights;
use crate::models::video::RawVideo;

/// Normalised components of the virality coefficient
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViralityComponents {
    pub velocity: f64,
    pub share_ratio: f64,
    pub cross_platform: f64,
}

impl ViralityComponents {
    #[must_use]
    pub fn coefficient(&self, w: &ViralityWeights) -> f64 {
        let total = w.velocity + w.share_ratio + w.cross_platform;
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = w.velocity * self.velocity
            + w.share_ratio * self.share_ratio
            + w.cross_platform * self.cross_platform;
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Views per hour as of `observed_at`
///
/// With two or more history samples the slope of the last two is used;
/// otherwise lifetime views over age (at least one hour). Unknown age is `0`.
#[must_use]
pub fn view_velocity(raw: &RawVideo, observed_at: DateTime<Utc>) -> f64 {
    if let [.., prev, last] = raw.history.as_slice() {
        let hours = (last.at - prev.at).num_seconds() as f64 / 3_600.0;
        if hours > 0.0 {
            return last.views.saturating_sub(prev.views) as f64 / hours;
        }
    }
    match raw.created_at {
        Some(created) => {
            let hours = ((observed_at - created).num_seconds() as f64 / 3_600.0).max(1.0);
            raw.stats.views as f64 / hours
        }
        None => 0.0,
    }
}

#[must_use]
pub fn components(raw: &RawVideo, observed_at: DateTime<Utc>, w: &ViralityWeights) -> ViralityComponents {
    let share_ratio = if raw.stats.views == 0 {
        0.0
    } else {
        let ratio = raw.stats.shares as f64 / raw.stats.views as f64;
        (ratio / w.share_ratio_cap).min(1.0)
    };
    ViralityComponents {
        velocity: log_normalise(view_velocity(raw, observed_at), w.velocity_reference_per_hour),
        share_ratio,
        cross_platform: log_normalise(raw.cross_platform_shares as f64, w.cross_platform_reference),
    }
}

/// `ln(1 + value) / ln(1 + reference)`, capped at 1
#[must_use]
pub fn log_normalise(value: f64, reference: f64) -> f64 {
    if value <= 0.0 || reference <= 0.0 {
        return 0.0;
    }
    (value.ln_1p() / reference.ln_1p()).min(1.0)
}

#[must_use]
pub fn is_viral(coefficient: f64, w: &ViralityWeights) -> bool {
    coefficient >= w.viral_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::video::{StatsSample, VideoStats};
    use chrono::Duration;

    fn video(views: u64, shares: u64, age_hours: i64, now: DateTime<Utc>) -> RawVideo {
        RawVideo {
            id: "v".into(),
            created_at: Some(now - Duration::hours(age_hours)),
            stats: VideoStats {
                views,
                shares,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn quiet_video_scores_low() {
        let now = Utc::now();
        let w = ViralityWeights::default();
        let c = components(&video(100, 0, 240, now), now, &w).coefficient(&w);
        assert!(c < 0.2, "{c}");
        assert!(!is_viral(c, &w));
    }

    #[test]
    fn explosive_video_is_viral() {
        let now = Utc::now();
        let w = ViralityWeights::default();
        let mut raw = video(5_000_000, 400_000, 10, now);
        raw.cross_platform_shares = 20_000;
        let c = components(&raw, now, &w).coefficient(&w);
        assert!(c >= w.viral_threshold, "{c}");
        assert!(c <= 1.0);
    }

    #[test]
    fn history_slope_beats_lifetime_average() {
        let now = Utc::now();
        let mut raw = video(10_000, 0, 1_000, now);
        raw.history = vec![
            StatsSample {
                at: now - Duration::hours(2),
                views: 4_000,
                engagement: 0,
            },
            StatsSample {
                at: now,
                views: 10_000,
                engagement: 0,
            },
        ];
        assert_eq!(view_velocity(&raw, now), 3_000.0);
    }

    #[test]
    fn log_normalise_caps_at_one() {
        assert_eq!(log_normalise(0.0, 100.0), 0.0);
        assert_eq!(log_normalise(1e12, 100.0), 1.0);
        assert_eq!(log_normalise(100.0, 100.0), 1.0);
    }
}
