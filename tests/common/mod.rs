//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use trendscrape::cache::{InMemoryRemoteCache, MultiTierCache};
use trendscrape::config::{BucketSettings, FetchSettings, RetrySettings, ScraperConfig};
use trendscrape::fetch::{AttemptError, FetchPipeline, FetchRequest, Fetcher};
use trendscrape::jobs::{JobStore, MemoryJobStore};
use trendscrape::metrics::{LogSink, ScraperMetrics};
use trendscrape::proxy_registry::{ProxyProbe, ProxyRegistry};
use trendscrape::store::{EntityStore, MemoryEntityStore};
use trendscrape::{ScrapeEvent, SupervisorDeps};

pub const VIDEO_V1: &str = r#"{"itemInfo":{"itemStruct":{"id":"v1","desc":"new #dance trend",
    "createTime":1700000000,
    "stats":{"playCount":120000,"diggCount":9000,"commentCount":400,"shareCount":800}}}}"#;

pub fn video_body(id: &str) -> String {
    VIDEO_V1.replace("\"v1\"", &format!("\"{id}\""))
}

/// One recorded fetch attempt
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SeenRequest {
    pub url: String,
    pub proxy: Option<String>,
    pub at: Instant,
}

/// Fails each URL a scripted number of times, then answers with a fixed body
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<Vec<(String, VecDeque<AttemptError>, String)>>,
    seen: Mutex<Vec<SeenRequest>>,
}

#[allow(dead_code)]
impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests whose URL contains `needle` fail with `failures` in order, then get `body`
    pub fn route(self, needle: &str, failures: Vec<AttemptError>, body: impl Into<String>) -> Self {
        self.routes
            .lock()
            .push((needle.to_string(), failures.into(), body.into()));
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AttemptError> {
        self.seen.lock().push(SeenRequest {
            url: request.url.clone(),
            proxy: request.proxy.clone(),
            at: Instant::now(),
        });
        let mut routes = self.routes.lock();
        let Some((_, failures, body)) = routes
            .iter_mut()
            .find(|(needle, _, _)| request.url.contains(needle.as_str()))
        else {
            return Err(AttemptError::permanent(format!("{} returned 404", request.url)));
        };
        match failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(body.clone()),
        }
    }
}

/// Probe that reports every proxy healthy
pub struct AlwaysUp;

#[async_trait]
impl ProxyProbe for AlwaysUp {
    async fn probe(&self, _address: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fast retries, roomy buckets, no jitter
pub fn fast_fetch_settings() -> FetchSettings {
    FetchSettings {
        api_bucket: BucketSettings::new(50, 50.0),
        navigation_bucket: BucketSettings::new(50, 50.0),
        call_timeout_ms: 1_000,
        retry: RetrySettings {
            max_attempts: 3,
            base_delay_ms: 5,
            multiplier: 2.0,
            max_delay_ms: 20,
            jitter: 0.0,
        },
        ..FetchSettings::default()
    }
}

/// Supervisor wiring around `fetcher` with in-memory stores and no browser pool
#[allow(dead_code)]
pub fn supervisor_deps(
    fetcher: Arc<dyn Fetcher>,
    fetch: FetchSettings,
    proxies: &[&str],
) -> (SupervisorDeps, Arc<MemoryJobStore>, Arc<MemoryEntityStore>) {
    let mut config = ScraperConfig::default();
    config.fetch = fetch;
    config.jobs.workers = 2;
    config.jobs.max_in_flight = 2;
    config.jobs.retry_delay_ms = 10;
    config.proxy.check_interval_secs = 3_600;
    config.metrics.interval_secs = 3_600;
    config.endpoints.video_url = "https://platform.test/api/item/detail?itemId={key}".into();

    let metrics = Arc::new(ScraperMetrics::new());
    let registry = Arc::new(ProxyRegistry::new(config.proxy.failure_threshold, Arc::clone(&metrics)));
    for address in proxies {
        registry.register(address).expect("valid proxy address");
    }
    let job_store = Arc::new(MemoryJobStore::new());
    let entity_store = Arc::new(MemoryEntityStore::new());

    let deps = SupervisorDeps {
        cache: Arc::new(MultiTierCache::new(
            config.cache.clone(),
            Arc::new(InMemoryRemoteCache::new()),
            Arc::clone(&metrics),
        )),
        pipeline: Arc::new(FetchPipeline::new(&config.fetch, Arc::clone(&metrics))),
        config,
        proxies: registry,
        probe: Arc::new(AlwaysUp),
        pool: None,
        fetcher,
        job_store: job_store.clone() as Arc<dyn JobStore>,
        entity_store: entity_store.clone() as Arc<dyn EntityStore>,
        prediction: None,
        metrics_sink: Arc::new(LogSink),
        webhook: None,
        metrics,
    };
    (deps, job_store, entity_store)
}

/// Next terminal event for `job_id`, skipping others
#[allow(dead_code)]
pub async fn wait_for_job(events: &mut broadcast::Receiver<ScrapeEvent>, job_id: Uuid) -> ScrapeEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event bus open");
            if event.job_id() == job_id {
                return event;
            }
        }
    })
    .await
    .expect("job finished within 10s")
}
