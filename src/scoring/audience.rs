//! Audience quality, commercial value and brand safety

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::weights::{AudienceWeights, BrandSafetyWeights, CommercialWeights};

/// Weighted blend of authenticity, engagement and conversation depth
#[must_use]
pub fn audience_quality(
    authenticity: f64,
    engagement_rate: f64,
    comments: u64,
    likes: u64,
    w: &AudienceWeights,
) -> f64 {
    let total = w.authenticity + w.engagement + w.conversation;
    if total <= 0.0 {
        return 0.0;
    }
    let engagement = (engagement_rate / w.engagement_reference).clamp(0.0, 1.0);
    let conversation = if likes == 0 {
        0.0
    } else {
        ((comments as f64 / likes as f64) / w.conversation_reference).min(1.0)
    };
    let weighted = w.authenticity * authenticity.clamp(0.0, 1.0)
        + w.engagement * engagement
        + w.conversation * conversation;
    (weighted / total).clamp(0.0, 1.0)
}

/// Estimated value of one sponsored post in USD, rounded to cents
///
/// CPM on the average reach, scaled up for engagement (capped) and down for
/// audience quality.
#[must_use]
pub fn commercial_value(
    avg_views_per_post: f64,
    engagement_rate: f64,
    audience_quality: f64,
    w: &CommercialWeights,
) -> f64 {
    if avg_views_per_post <= 0.0 {
        return 0.0;
    }
    let multiplier = (1.0 + engagement_rate.max(0.0) * 10.0).min(w.max_engagement_multiplier);
    let value = avg_views_per_post / 1_000.0 * w.cpm_usd * multiplier * audience_quality.clamp(0.0, 1.0);
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandSafety {
    pub score: f64,
    /// Unsafe terms found, sorted
    pub flagged_terms: Vec<String>,
}

/// Lexicon scan over free text (bio, captions, hashtags)
#[must_use]
pub fn brand_safety<'a, I>(texts: I, w: &BrandSafetyWeights) -> BrandSafety
where
    I: IntoIterator<Item = &'a str>,
{
    let tokens: BTreeSet<String> = texts
        .into_iter()
        .flat_map(|text| text.split(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();

    let flagged_terms: Vec<String> = w
        .unsafe_terms
        .iter()
        .map(|t| t.to_lowercase())
        .filter(|t| tokens.contains(t))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let score = (1.0 - w.penalty_per_term * flagged_terms.len() as f64).max(0.0);
    BrandSafety { score, flagged_terms }
}
