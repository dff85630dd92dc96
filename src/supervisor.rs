//! Top-level owner of every long-lived component
//!
//! [`SupervisorDeps`] holds independently constructed modules;
//! [`Supervisor::start`] wires them together, starts the background loops and
//! [`Supervisor::shutdown`] tears them down in dependency order.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::browser_pool::{BrowserPool, ChromiumLauncher};
use crate::cache::{InMemoryRemoteCache, MultiTierCache};
use crate::config::ScraperConfig;
use crate::error::ScrapeResult;
use crate::events::{EventBus, ScrapeEvent, WebhookNotifier};
use crate::fetch::{BrowserFetcher, FetchPipeline, Fetcher, HttpFetcher, PlatformFetcher};
use crate::jobs::{JobQueue, JobRequest, JobStore, MemoryJobStore, ScrapeJob, SqliteJobStore, WorkerPool};
use crate::metrics::{
    HealthInputs, HealthReport, InfluxLineSink, LogSink, MetricsReporter, MetricsSink, ScraperMetrics,
};
use crate::proxy_registry::{HttpProxyProbe, ProxyProbe, ProxyRegistry};
use crate::scoring::{HttpPredictionClient, PredictionService, ScoringEngine};
use crate::scrape::{ScrapeDeps, ScrapeJobHandler};
use crate::store::{EntityStore, MemoryEntityStore, SqliteEntityStore};
use crate::utils::constants::DEFAULT_EVENT_BUS_CAPACITY;

/// How long in-flight jobs get to finish once shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Timeout of metrics collector writes
const METRICS_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicitly constructed components handed to [`Supervisor::start`]
pub struct SupervisorDeps {
    pub config: ScraperConfig,
    pub metrics: Arc<ScraperMetrics>,
    pub proxies: Arc<ProxyRegistry>,
    pub probe: Arc<dyn ProxyProbe>,
    /// Not started yet; `None` runs without a browser pool
    pub pool: Option<Arc<BrowserPool>>,
    pub cache: Arc<MultiTierCache>,
    pub pipeline: Arc<FetchPipeline>,
    pub fetcher: Arc<dyn Fetcher>,
    pub job_store: Arc<dyn JobStore>,
    pub entity_store: Arc<dyn EntityStore>,
    pub prediction: Option<Arc<dyn PredictionService>>,
    pub metrics_sink: Arc<dyn MetricsSink>,
    pub webhook: Option<WebhookNotifier>,
}

impl SupervisorDeps {
    /// Production wiring: chromium pool, HTTP fetcher, SQLite or in-memory
    /// stores, Influx or log metrics sink
    pub async fn from_config(config: ScraperConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let metrics = Arc::new(ScraperMetrics::new());

        let proxies = Arc::new(ProxyRegistry::new(config.proxy.failure_threshold, Arc::clone(&metrics)));
        for address in &config.proxy.endpoints {
            proxies.register(address)?;
        }
        let probe: Arc<dyn ProxyProbe> = Arc::new(HttpProxyProbe::new(
            config.proxy.probe_url.clone(),
            config.proxy.probe_timeout(),
        ));

        let launcher = Arc::new(ChromiumLauncher::new(
            config.browser_pool.headless,
            config.browser_pool.chrome_executable.clone(),
            config.fetch.call_timeout(),
        ));
        let pool = BrowserPool::new(
            config.browser_pool.clone(),
            launcher,
            config.browser_pool.use_proxy.then(|| Arc::clone(&proxies)),
            Arc::clone(&metrics),
        );

        let http = HttpFetcher::new(
            config.fetch.user_agent.clone(),
            config.fetch.call_timeout(),
            Some(Arc::clone(&proxies)),
        );
        let fetcher: Arc<dyn Fetcher> = Arc::new(PlatformFetcher::new(
            http,
            Some(BrowserFetcher::new(Arc::clone(&pool))),
        ));

        let cache = Arc::new(MultiTierCache::new(
            config.cache.clone(),
            Arc::new(InMemoryRemoteCache::new()),
            Arc::clone(&metrics),
        ));
        let pipeline = Arc::new(FetchPipeline::new(&config.fetch, Arc::clone(&metrics)));

        let (job_store, entity_store): (Arc<dyn JobStore>, Arc<dyn EntityStore>) =
            match &config.storage.database_path {
                Some(path) => (
                    Arc::new(SqliteJobStore::open(path).await?),
                    Arc::new(SqliteEntityStore::open(path).await?),
                ),
                None => (Arc::new(MemoryJobStore::new()), Arc::new(MemoryEntityStore::new())),
            };

        let prediction = match &config.prediction {
            Some(settings) => Some(Arc::new(HttpPredictionClient::new(settings)?) as Arc<dyn PredictionService>),
            None => None,
        };

        let metrics_sink: Arc<dyn MetricsSink> = match &config.metrics.influx_write_url {
            Some(url) => Arc::new(InfluxLineSink::new(
                url.clone(),
                config.metrics.influx_token.clone(),
                METRICS_WRITE_TIMEOUT,
            )?),
            None => Arc::new(LogSink),
        };

        let webhook = config
            .webhook
            .as_ref()
            .map(|settings| WebhookNotifier::new(settings, Arc::clone(&metrics)))
            .transpose()?;

        Ok(Self {
            config,
            metrics,
            proxies,
            probe,
            pool: Some(pool),
            cache,
            pipeline,
            fetcher,
            job_store,
            entity_store,
            prediction,
            metrics_sink,
            webhook,
        })
    }
}

pub struct Supervisor {
    queue: Arc<JobQueue>,
    bus: Arc<EventBus>,
    metrics: Arc<ScraperMetrics>,
    proxies: Arc<ProxyRegistry>,
    pool: Option<Arc<BrowserPool>>,
    pipeline: Arc<FetchPipeline>,
    cache: Arc<MultiTierCache>,
    entity_store: Arc<dyn EntityStore>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Start every component and recover unfinished jobs
    ///
    /// # Errors
    ///
    /// Fails when the browser pool cannot launch a single browser or the job
    /// store cannot be read.
    pub async fn start(deps: SupervisorDeps) -> Result<Self> {
        let SupervisorDeps {
            config,
            metrics,
            proxies,
            probe,
            pool,
            cache,
            pipeline,
            fetcher,
            job_store,
            entity_store,
            prediction,
            metrics_sink,
            webhook,
        } = deps;

        let shutdown = CancellationToken::new();
        let mut background = Vec::new();

        background.push(proxies.spawn_health_loop(probe, config.proxy.check_interval(), shutdown.clone()));

        if let Some(pool) = &pool {
            pool.start().await.context("Failed to start browser pool")?;
        }

        background.push(cache.spawn_sweeper(shutdown.clone()));

        let bus = Arc::new(EventBus::new(DEFAULT_EVENT_BUS_CAPACITY, Arc::clone(&metrics)));
        if let Some(webhook) = webhook {
            background.push(webhook.spawn(bus.subscribe(), shutdown.clone()));
        }

        let queue = Arc::new(JobQueue::new(
            job_store,
            Arc::clone(&metrics),
            config.jobs.default_max_retries,
        ));
        queue.recover().await.context("Failed to recover jobs")?;
        background.push(queue.spawn_pruner(
            config.jobs.retention(),
            config.jobs.prune_interval(),
            shutdown.clone(),
        ));

        let handler = Arc::new(ScrapeJobHandler::new(ScrapeDeps {
            cache: Arc::clone(&cache),
            pipeline: Arc::clone(&pipeline),
            fetcher,
            proxies: Arc::clone(&proxies),
            scoring: ScoringEngine::new(config.scoring.clone()),
            endpoints: config.endpoints.clone(),
            store: Arc::clone(&entity_store),
            prediction,
            metrics: Arc::clone(&metrics),
        }));
        let workers = WorkerPool::new(
            &config.jobs,
            Arc::clone(&queue),
            handler,
            Arc::clone(&bus),
            Arc::clone(&metrics),
        )
        .spawn(shutdown.clone());

        let reporter = MetricsReporter::new(Arc::clone(&metrics), config.metrics.interval());
        background.push(reporter.spawn(metrics_sink, shutdown.clone()));

        info!(
            workers = config.jobs.workers,
            proxies = proxies.len(),
            browser_pool = pool.is_some(),
            "Supervisor started"
        );

        Ok(Self {
            queue,
            bus,
            metrics,
            proxies,
            pool,
            pipeline,
            cache,
            entity_store,
            shutdown,
            workers,
            background,
        })
    }

    pub async fn enqueue(&self, request: JobRequest) -> ScrapeResult<Uuid> {
        self.queue.enqueue(request).await
    }

    pub async fn status(&self, id: Uuid) -> ScrapeResult<Option<ScrapeJob>> {
        self.queue.status(id).await
    }

    pub async fn cancel(&self, id: Uuid) -> ScrapeResult<bool> {
        self.queue.cancel(id).await
    }

    /// Drop terminal jobs that finished more than `age` ago
    pub async fn prune_jobs(&self, age: Duration) -> ScrapeResult<u64> {
        self.queue.prune_older_than(age).await
    }

    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::assess(
            HealthInputs {
                proxies_healthy: self.proxies.healthy_count(),
                proxies_total: self.proxies.len(),
                pool: self.pool.as_ref().map(|p| p.stats()),
                open_circuits: self.pipeline.breaker().open_classes(),
                queue_depth: self.queue.depth(),
                in_flight: self.queue.in_flight(),
            },
            Utc::now(),
        )
    }

    /// Completion events of every job
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScrapeEvent> {
        self.bus.subscribe()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ScraperMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<MultiTierCache> {
        &self.cache
    }

    #[must_use]
    pub fn entity_store(&self) -> &Arc<dyn EntityStore> {
        &self.entity_store
    }

    #[must_use]
    pub fn proxies(&self) -> &Arc<ProxyRegistry> {
        &self.proxies
    }

    /// Stop taking jobs, let running ones finish within the grace period,
    /// then stop the background loops and close every browser
    pub async fn shutdown(self) {
        info!("Supervisor shutting down");
        self.queue.close();

        let mut workers = Box::pin(join_all(self.workers));
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut workers).await.is_err() {
            warn!(
                in_flight = self.queue.in_flight(),
                "jobs still running after {SHUTDOWN_GRACE:?}, cancelling"
            );
            self.queue.cancel_running();
            self.shutdown.cancel();
            workers.await;
        }

        self.shutdown.cancel();
        for result in join_all(self.background).await {
            if let Err(e) = result {
                warn!("background task ended abnormally: {e}");
            }
        }

        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
        info!("Supervisor stopped");
    }
}
