//! Scoring/Analytics engine
//!
//! Pure, deterministic functions from raw snapshot fields to derived scores.
//! The only I/O is the optional [`PredictionService`], which callers invoke
//! explicitly through [`ScoringEngine::predict_profile`].

pub mod audience;
pub mod authenticity;
pub mod engagement;
pub mod lifecycle;
pub mod prediction;
pub mod sentiment;
pub mod virality;
pub mod weights;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::error::ErrorKind;
use crate::metrics::ScraperMetrics;
use crate::models::{
    CompetitorAnalysis, HashtagTrend, RawHashtag, RawProfile, RawSoundTrend, RawVideo, SoundTrend,
    UserProfile, Video,
};

pub use audience::BrandSafety;
pub use lifecycle::TrendLifecycle;
pub use prediction::{FeatureVector, HttpPredictionClient, Prediction, PredictionService};
pub use weights::ScoringWeights;

/// Scores raw snapshots with one set of weights
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: Arc<ScoringWeights>,
}

impl ScoringEngine {
    #[must_use]
    pub fn new(weights: ScoringWeights) -> Self {
        Self {
            weights: Arc::new(weights),
        }
    }

    #[must_use]
    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    #[must_use]
    pub fn score_profile(&self, raw: RawProfile, scraped_at: DateTime<Utc>) -> UserProfile {
        UserProfile::from_raw(raw, &self.weights, scraped_at)
    }

    #[must_use]
    pub fn score_video(&self, raw: RawVideo, scraped_at: DateTime<Utc>) -> Video {
        Video::from_raw(raw, &self.weights, scraped_at)
    }

    #[must_use]
    pub fn score_sound(&self, raw: RawSoundTrend, scraped_at: DateTime<Utc>) -> SoundTrend {
        SoundTrend::from_raw(raw, &self.weights, scraped_at)
    }

    #[must_use]
    pub fn score_hashtag(&self, raw: RawHashtag, scraped_at: DateTime<Utc>) -> HashtagTrend {
        HashtagTrend::from_raw(raw, &self.weights, scraped_at)
    }

    #[must_use]
    pub fn compare(&self, own: &UserProfile, competitor: &UserProfile) -> CompetitorAnalysis {
        CompetitorAnalysis::compare(own, competitor)
    }

    /// Ask the prediction service about a profile and attach the answer
    ///
    /// Failures leave the profile without predictions; they are logged and
    /// counted, never propagated.
    pub async fn predict_profile(
        &self,
        profile: &mut UserProfile,
        service: &dyn PredictionService,
        metrics: &ScraperMetrics,
    ) {
        let features = FeatureVector::from_profile(profile);
        match service.predict(&features).await {
            Ok(prediction) => profile.attach_prediction(prediction),
            Err(e) => {
                warn!(profile = %profile.id(), "prediction skipped: {e}");
                metrics.record_error(ErrorKind::Prediction);
            }
        }
    }
}
