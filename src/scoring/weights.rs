//! Tunable scoring parameters
//!
//! The weights are empirical; every one of them can be overridden from the
//! `scoring` section of the configuration. `validate` only checks ranges.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViralityWeights {
    pub velocity: f64,
    pub share_ratio: f64,
    pub cross_platform: f64,
    /// Views per hour that map to a velocity component of 1.0
    pub velocity_reference_per_hour: f64,
    /// Share-to-view ratio that maps to a share component of 1.0
    pub share_ratio_cap: f64,
    /// Cross-platform shares that map to a component of 1.0
    pub cross_platform_reference: f64,
    /// `isViral` is set when the coefficient reaches this value
    pub viral_threshold: f64,
}

impl Default for ViralityWeights {
    fn default() -> Self {
        Self {
            velocity: 0.5,
            share_ratio: 0.3,
            cross_platform: 0.2,
            velocity_reference_per_hour: 100_000.0,
            share_ratio_cap: 0.05,
            cross_platform_reference: 10_000.0,
            viral_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticityWeights {
    pub engagement_anomaly: f64,
    pub follow_ratio: f64,
    pub timing_regularity: f64,
    pub bot_activity: f64,
    /// Average engagements per post below this fraction of followers is anomalous
    pub min_engagement_per_follower: f64,
    /// following/followers above this looks like follow-for-follow farming
    pub suspicious_follow_ratio: f64,
    /// Posting-interval variation below this looks scheduled by a bot
    pub regular_interval_cv: f64,
    /// Share of duplicate comments in a sample that reads as bot activity
    pub duplicate_comment_ratio: f64,
}

impl Default for AuthenticityWeights {
    fn default() -> Self {
        Self {
            engagement_anomaly: 0.4,
            follow_ratio: 0.2,
            timing_regularity: 0.2,
            bot_activity: 0.2,
            min_engagement_per_follower: 0.005,
            suspicious_follow_ratio: 2.0,
            regular_interval_cv: 0.1,
            duplicate_comment_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceWeights {
    pub authenticity: f64,
    pub engagement: f64,
    pub conversation: f64,
    /// Engagement rate that maps to an engagement component of 1.0
    pub engagement_reference: f64,
    /// comments/likes ratio that maps to a conversation component of 1.0
    pub conversation_reference: f64,
}

impl Default for AudienceWeights {
    fn default() -> Self {
        Self {
            authenticity: 0.5,
            engagement: 0.3,
            conversation: 0.2,
            engagement_reference: 0.1,
            conversation_reference: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommercialWeights {
    /// Value of 1000 average views of a sponsored post, in USD
    pub cpm_usd: f64,
    /// Multiplier ceiling applied for outstanding engagement
    pub max_engagement_multiplier: f64,
}

impl Default for CommercialWeights {
    fn default() -> Self {
        Self {
            cpm_usd: 10.0,
            max_engagement_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandSafetyWeights {
    pub unsafe_terms: Vec<String>,
    pub penalty_per_term: f64,
}

impl Default for BrandSafetyWeights {
    fn default() -> Self {
        Self {
            unsafe_terms: [
                "nsfw", "gore", "violence", "drugs", "gambling", "weapon", "hate", "scam", "explicit",
                "betting",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            penalty_per_term: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleThresholds {
    /// Latest period usage below this is still emerging
    pub emerging_max_usage: u64,
    /// Period-over-period growth at or above this is rising
    pub rising_growth: f64,
    /// Period-over-period growth at or below this (negative) is declining
    pub declining_growth: f64,
    /// Periods of history needed before evergreen can be observed
    pub evergreen_min_periods: usize,
    /// Usage variation across those periods at or below this is evergreen
    pub evergreen_max_cv: f64,
}

impl Default for LifecycleThresholds {
    fn default() -> Self {
        Self {
            emerging_max_usage: 1_000,
            rising_growth: 0.25,
            declining_growth: -0.15,
            evergreen_min_periods: 8,
            evergreen_max_cv: 0.2,
        }
    }
}

/// Every weight and threshold used by the scoring engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub virality: ViralityWeights,
    pub authenticity: AuthenticityWeights,
    pub audience: AudienceWeights,
    pub commercial: CommercialWeights,
    pub brand_safety: BrandSafetyWeights,
    pub lifecycle: LifecycleThresholds,
}

impl ScoringWeights {
    /// Check that weights are in `[0, 1]` and reference values are positive
    pub fn validate(&self) -> Result<(), String> {
        let unit = [
            ("virality.velocity", self.virality.velocity),
            ("virality.share_ratio", self.virality.share_ratio),
            ("virality.cross_platform", self.virality.cross_platform),
            ("virality.viral_threshold", self.virality.viral_threshold),
            ("authenticity.engagement_anomaly", self.authenticity.engagement_anomaly),
            ("authenticity.follow_ratio", self.authenticity.follow_ratio),
            ("authenticity.timing_regularity", self.authenticity.timing_regularity),
            ("authenticity.bot_activity", self.authenticity.bot_activity),
            ("authenticity.duplicate_comment_ratio", self.authenticity.duplicate_comment_ratio),
            ("audience.authenticity", self.audience.authenticity),
            ("audience.engagement", self.audience.engagement),
            ("audience.conversation", self.audience.conversation),
            ("brand_safety.penalty_per_term", self.brand_safety.penalty_per_term),
            ("lifecycle.evergreen_max_cv", self.lifecycle.evergreen_max_cv),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} = {value} is outside [0, 1]"));
            }
        }

        let positive = [
            ("virality.velocity_reference_per_hour", self.virality.velocity_reference_per_hour),
            ("virality.share_ratio_cap", self.virality.share_ratio_cap),
            ("virality.cross_platform_reference", self.virality.cross_platform_reference),
            ("audience.engagement_reference", self.audience.engagement_reference),
            ("audience.conversation_reference", self.audience.conversation_reference),
            ("commercial.max_engagement_multiplier", self.commercial.max_engagement_multiplier),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(format!("{name} = {value} must be positive"));
            }
        }
        if self.commercial.cpm_usd < 0.0 {
            return Err("commercial.cpm_usd must not be negative".to_string());
        }
        if self.lifecycle.declining_growth >= 0.0 || self.lifecycle.rising_growth <= 0.0 {
            return Err("lifecycle growth thresholds must straddle zero".to_string());
        }
        Ok(())
    }
}
