//! External prediction capability
//!
//! Inference only: a snapshot is reduced to a [`FeatureVector`] and sent to a
//! [`PredictionService`]. Calling it is an explicit step, never part of the
//! pure scoring functions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::PredictionSettings;
use crate::error::{ScrapeError, ScrapeResult};
use crate::models::{UserProfile, Video};

/// Model inputs derived from one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub entity_type: String,
    pub entity_id: String,
    /// `ln(1 + followers)` for profiles, `ln(1 + views)` for videos
    pub log_reach: f64,
    pub engagement_rate: f64,
    pub virality: f64,
    pub authenticity: f64,
    pub consistency: f64,
    pub posting_frequency_per_week: f64,
    pub verified: bool,
}

impl FeatureVector {
    #[must_use]
    pub fn from_profile(profile: &UserProfile) -> Self {
        let a = profile.analytics();
        Self {
            entity_type: "user".to_string(),
            entity_id: profile.id().to_string(),
            log_reach: (profile.raw().follower_count as f64).ln_1p(),
            engagement_rate: a.engagement_rate,
            virality: a.virality_score,
            authenticity: a.authenticity_score,
            consistency: a.content_consistency,
            posting_frequency_per_week: a.posting_frequency_per_week,
            verified: profile.raw().verified,
        }
    }

    #[must_use]
    pub fn from_video(video: &Video) -> Self {
        let a = video.analytics();
        Self {
            entity_type: "video".to_string(),
            entity_id: video.id().to_string(),
            log_reach: (video.stats().views as f64).ln_1p(),
            engagement_rate: a.engagement_rate,
            virality: a.virality_coefficient,
            authenticity: 1.0 - a.bot_activity_score,
            consistency: 0.0,
            posting_frequency_per_week: 0.0,
            verified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub score: f64,
    /// `[0, 1]`
    pub confidence: f64,
}

#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, features: &FeatureVector) -> ScrapeResult<Prediction>;
}

/// JSON-over-HTTP prediction endpoint: `POST {features}` -> `{score, confidence}`
pub struct HttpPredictionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpPredictionClient {
    pub fn new(settings: &PredictionSettings) -> ScrapeResult<Self> {
        Self::with_timeout(settings.url.clone(), settings.api_key.clone(), settings.timeout())
    }

    pub fn with_timeout(url: String, api_key: Option<String>, timeout: Duration) -> ScrapeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Config(format!("prediction client: {e}")))?;
        Ok(Self { client, url, api_key })
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    features: &'a FeatureVector,
}

#[async_trait]
impl PredictionService for HttpPredictionClient {
    async fn predict(&self, features: &FeatureVector) -> ScrapeResult<Prediction> {
        let mut request = self.client.post(&self.url).json(&PredictRequest { features });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ScrapeError::Prediction(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Prediction(format!("HTTP {status} from {}", self.url)));
        }
        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| ScrapeError::Prediction(format!("malformed response: {e}")))?;
        if !prediction.score.is_finite() || !(0.0..=1.0).contains(&prediction.confidence) {
            return Err(ScrapeError::Prediction(format!(
                "out-of-range prediction {prediction:?}"
            )));
        }
        debug!(entity = %features.entity_id, score = prediction.score, "prediction received");
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawProfile;
    use crate::scoring::weights::ScoringWeights;
    use chrono::Utc;

    fn features() -> FeatureVector {
        let raw = RawProfile {
            id: "u1".into(),
            handle: "h".into(),
            follower_count: 1_000,
            ..Default::default()
        };
        FeatureVector::from_profile(&UserProfile::from_raw(raw, &ScoringWeights::default(), Utc::now()))
    }

    #[tokio::test]
    async fn posts_features_and_parses_prediction() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/predict")
            .match_header("authorization", "Bearer k")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "features": {"entityType": "user", "entityId": "u1"}
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"score": 0.82, "confidence": 0.6}"#)
            .create_async()
            .await;

        let client = HttpPredictionClient::with_timeout(
            format!("{}/predict", server.url()),
            Some("k".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        let prediction = client.predict(&features()).await.unwrap();
        assert_eq!(prediction, Prediction { score: 0.82, confidence: 0.6 });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejects_out_of_range_confidence() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/predict")
            .with_body(r#"{"score": 0.5, "confidence": 3.0}"#)
            .create_async()
            .await;
        let client =
            HttpPredictionClient::with_timeout(format!("{}/predict", server.url()), None, Duration::from_secs(2)).unwrap();
        let err = client.predict(&features()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Prediction);
    }
}
