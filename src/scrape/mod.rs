//! Scrape job execution
//!
//! [`ScrapeJobHandler`] is the [`JobHandler`] behind the worker pool: cache
//! lookup, fetch through the pipeline, parse, score, cache and persist.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheSource, MultiTierCache};
use crate::config::EndpointSettings;
use crate::error::{ErrorKind, ScrapeError, ScrapeResult};
use crate::fetch::{FetchPipeline, FetchRequest, Fetcher, TargetClass};
use crate::jobs::{JobHandler, ScrapeJob, TargetType};
use crate::metrics::ScraperMetrics;
use crate::models::{HashtagTrend, SoundTrend, UserProfile, Video};
use crate::parse;
use crate::proxy_registry::ProxyRegistry;
use crate::scoring::{PredictionService, ScoringEngine};
use crate::store::{EntityRecord, EntityStore};

/// Everything a [`ScrapeJobHandler`] talks to
pub struct ScrapeDeps {
    pub cache: Arc<MultiTierCache>,
    pub pipeline: Arc<FetchPipeline>,
    pub fetcher: Arc<dyn Fetcher>,
    pub proxies: Arc<ProxyRegistry>,
    pub scoring: ScoringEngine,
    pub endpoints: EndpointSettings,
    pub store: Arc<dyn EntityStore>,
    pub prediction: Option<Arc<dyn PredictionService>>,
    pub metrics: Arc<ScraperMetrics>,
}

pub struct ScrapeJobHandler {
    deps: ScrapeDeps,
}

/// Replace `{key}` in an endpoint template
fn render(template: &str, key: &str) -> String {
    template.replace("{key}", key)
}

impl ScrapeJobHandler {
    #[must_use]
    pub fn new(deps: ScrapeDeps) -> Self {
        Self { deps }
    }

    /// One pipeline-guarded fetch; API calls rotate through healthy proxies
    async fn fetch_body(
        &self,
        class: TargetClass,
        url: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> ScrapeResult<String> {
        self.deps
            .pipeline
            .execute(class, label, cancel, |attempt| {
                let proxy = match class {
                    TargetClass::Api if !self.deps.proxies.is_empty() => self.deps.proxies.pick_healthy(),
                    _ => None,
                };
                debug!(%label, attempt, %class, proxied = proxy.is_some(), "fetch attempt");
                let request = FetchRequest {
                    class,
                    url: url.to_string(),
                    proxy,
                };
                let fetcher = Arc::clone(&self.deps.fetcher);
                async move { fetcher.fetch(&request).await }
            })
            .await
    }

    /// Cache-aside around `fetch`; `bypass_cache` forces a fetch and overwrites
    async fn cached<T, F, Fut>(
        &self,
        job: &ScrapeJob,
        key: &CacheKey,
        fetch: F,
    ) -> ScrapeResult<(T, CacheSource)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        let ttl = job.options.cache_ttl_secs.map(Duration::from_secs);
        let tags = vec![key.entity_ref()];
        if job.options.bypass_cache {
            let value = fetch().await?;
            self.deps.cache.set(key, &value, ttl, &tags).await?;
            return Ok((value, CacheSource::Fetched));
        }
        self.deps.cache.get_or_fetch(key, ttl, &tags, fetch).await
    }

    /// Write a freshly fetched entity to the store
    ///
    /// The cache already holds the value, so a store failure is logged and
    /// counted rather than failing the job.
    async fn persist<T: Serialize>(&self, key: CacheKey, entity: &T) {
        let body = match serde_json::to_value(entity) {
            Ok(body) => body,
            Err(e) => {
                warn!(%key, "could not serialise entity for storage: {e}");
                self.deps.metrics.record_error(ErrorKind::Internal);
                return;
            }
        };
        let record = EntityRecord::new(key, body, Utc::now());
        if let Err(e) = self.deps.store.upsert(&record).await {
            warn!(key = %record.key, "entity not persisted: {e}");
            self.deps.metrics.record_error(e.kind());
        }
    }

    async fn finish<T: Serialize>(
        &self,
        key: CacheKey,
        entity: &T,
        source: CacheSource,
    ) -> ScrapeResult<serde_json::Value> {
        debug!(%key, ?source, "entity ready");
        if source == CacheSource::Fetched {
            self.persist(key, entity).await;
        }
        serde_json::to_value(entity).map_err(|e| ScrapeError::Internal(format!("serialising result: {e}")))
    }

    /// Profile page (navigation) and, when asked for, the video list (API) in parallel
    async fn scrape_profile(&self, job: &ScrapeJob, cancel: &CancellationToken) -> ScrapeResult<serde_json::Value> {
        let handle = job.target_key.as_str();
        let key = self.deps.cache.key(TargetType::Profile.entity_type(), handle);
        let label = job.label();

        let (mut profile, source) = self
            .cached(job, &key, || async {
                let page_url = render(&self.deps.endpoints.profile_url, handle);
                let page = self.fetch_body(TargetClass::Navigation, &page_url, &label, cancel);

                let mut profile = if job.options.include_videos {
                    let videos_url = render(&self.deps.endpoints.profile_videos_url, handle);
                    let videos = self.fetch_body(TargetClass::Api, &videos_url, &label, cancel);
                    let (page, videos) = tokio::join!(page, videos);
                    let raw = parse::parse_profile(&page?, handle)?;
                    let videos = parse::parse_video_list(&videos?, handle)?;
                    self.deps
                        .scoring
                        .score_profile(raw, Utc::now())
                        .with_videos(videos, self.deps.scoring.weights())
                } else {
                    let raw = parse::parse_profile(&page.await?, handle)?;
                    self.deps.scoring.score_profile(raw, Utc::now())
                };

                if let Some(service) = &self.deps.prediction {
                    self.deps
                        .scoring
                        .predict_profile(&mut profile, service.as_ref(), &self.deps.metrics)
                        .await;
                }
                Ok::<UserProfile, ScrapeError>(profile)
            })
            .await?;

        if source != CacheSource::Fetched {
            profile.refresh_freshness(Utc::now());
        }
        self.finish(key, &profile, source).await
    }

    async fn scrape_video(&self, job: &ScrapeJob, cancel: &CancellationToken) -> ScrapeResult<serde_json::Value> {
        let id = job.target_key.as_str();
        let key = self.deps.cache.key(TargetType::Video.entity_type(), id);
        let label = job.label();

        let (mut video, source) = self
            .cached(job, &key, || async {
                let url = render(&self.deps.endpoints.video_url, id);
                let body = self.fetch_body(TargetClass::Api, &url, &label, cancel).await?;
                let raw = parse::parse_video(&body, id)?;
                Ok::<Video, ScrapeError>(self.deps.scoring.score_video(raw, Utc::now()))
            })
            .await?;

        if source != CacheSource::Fetched {
            video.refresh_freshness(Utc::now());
        }
        self.finish(key, &video, source).await
    }

    async fn scrape_sound(&self, job: &ScrapeJob, cancel: &CancellationToken) -> ScrapeResult<serde_json::Value> {
        let id = job.target_key.as_str();
        let key = self.deps.cache.key(TargetType::Trend.entity_type(), id);
        let label = job.label();

        let (mut sound, source) = self
            .cached(job, &key, || async {
                let url = render(&self.deps.endpoints.trend_url, id);
                let body = self.fetch_body(TargetClass::Api, &url, &label, cancel).await?;
                let raw = parse::parse_sound(&body, id)?;
                Ok::<SoundTrend, ScrapeError>(self.deps.scoring.score_sound(raw, Utc::now()))
            })
            .await?;

        if source != CacheSource::Fetched {
            sound.refresh_freshness(Utc::now());
        }
        self.finish(key, &sound, source).await
    }

    async fn scrape_hashtag(&self, job: &ScrapeJob, cancel: &CancellationToken) -> ScrapeResult<serde_json::Value> {
        let name = job.target_key.trim_start_matches('#');
        let key = self.deps.cache.key(TargetType::Hashtag.entity_type(), name);
        let label = job.label();

        let (mut hashtag, source) = self
            .cached(job, &key, || async {
                let url = render(&self.deps.endpoints.hashtag_url, name);
                let body = self.fetch_body(TargetClass::Navigation, &url, &label, cancel).await?;
                let raw = parse::parse_hashtag(&body, name)?;
                Ok::<HashtagTrend, ScrapeError>(self.deps.scoring.score_hashtag(raw, Utc::now()))
            })
            .await?;

        if source != CacheSource::Fetched {
            hashtag.refresh_freshness(Utc::now());
        }
        self.finish(key, &hashtag, source).await
    }
}

#[async_trait]
impl JobHandler for ScrapeJobHandler {
    async fn handle(&self, job: &ScrapeJob, cancel: &CancellationToken) -> ScrapeResult<serde_json::Value> {
        match job.target_type {
            TargetType::Profile => self.scrape_profile(job, cancel).await,
            TargetType::Video => self.scrape_video(job, cancel).await,
            TargetType::Trend => self.scrape_sound(job, cancel).await,
            TargetType::Hashtag => self.scrape_hashtag(job, cancel).await,
        }
    }
}
