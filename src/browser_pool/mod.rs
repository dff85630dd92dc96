//! Fixed-size browser/page pool with scoped checkout
//!
//! `browsers` instances are launched at start, each pre-warmed with
//! `pages_per_browser` pages. A semaphore bounds concurrent checkouts to
//! `browsers * pages_per_browser`; a checkout waits up to the configured
//! timeout before failing with `ResourceExhausted`.
//!
//! Pages are handed out inside a [`PageLease`] which returns them on drop, so
//! every checkout is matched by exactly one checkin on every exit path. A
//! monitor loop replaces disconnected browsers; pages that belonged to a
//! replaced browser turn stale and fail fast with `StaleResource`.

pub mod fingerprint;
pub mod launcher;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use fingerprint::Fingerprint;
pub use launcher::{BrowserInstance, BrowserLauncher, ChromiumLauncher, PageDriver};

use crate::config::BrowserPoolSettings;
use crate::error::{ErrorKind, ScrapeError, ScrapeResult};
use crate::metrics::ScraperMetrics;
use crate::proxy_registry::ProxyRegistry;

// =============================================================================
// Pool entries
// =============================================================================

/// A launched browser and its liveness flag
struct BrowserSlot {
    id: u64,
    instance: Arc<dyn BrowserInstance>,
    /// Cleared when the browser is replaced; shared with every page it owns
    alive: Arc<AtomicBool>,
    proxy: Option<String>,
    launched_at: Instant,
}

/// A page waiting in the idle queue
struct PooledPage {
    id: u64,
    browser_id: u64,
    alive: Arc<AtomicBool>,
    driver: Arc<dyn PageDriver>,
}

impl PooledPage {
    fn is_stale(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub browsers: usize,
    pub idle_pages: usize,
    pub checked_out: usize,
    pub capacity: usize,
    pub respawns: u64,
    pub checkouts: u64,
    pub checkins: u64,
}

// =============================================================================
// Browser Pool
// =============================================================================

pub struct BrowserPool {
    settings: BrowserPoolSettings,
    launcher: Arc<dyn BrowserLauncher>,
    proxies: Option<Arc<ProxyRegistry>>,
    metrics: Arc<ScraperMetrics>,
    permits: Arc<Semaphore>,
    browsers: Mutex<Vec<BrowserSlot>>,
    idle: Mutex<VecDeque<PooledPage>>,
    next_browser_id: AtomicU64,
    next_page_id: AtomicU64,
    checked_out: AtomicUsize,
    checkouts: AtomicU64,
    checkins: AtomicU64,
    respawns: AtomicU64,
    shutdown: AtomicBool,
    monitor_cancel: CancellationToken,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserPool {
    /// Create a pool (does NOT launch browsers or start the monitor)
    pub fn new(
        settings: BrowserPoolSettings,
        launcher: Arc<dyn BrowserLauncher>,
        proxies: Option<Arc<ProxyRegistry>>,
        metrics: Arc<ScraperMetrics>,
    ) -> Arc<Self> {
        let capacity = settings.capacity().max(1);
        Arc::new(Self {
            settings,
            launcher,
            proxies,
            metrics,
            permits: Arc::new(Semaphore::new(capacity)),
            browsers: Mutex::new(Vec::new()),
            idle: Mutex::new(VecDeque::new()),
            next_browser_id: AtomicU64::new(0),
            next_page_id: AtomicU64::new(0),
            checked_out: AtomicUsize::new(0),
            checkouts: AtomicU64::new(0),
            checkins: AtomicU64::new(0),
            respawns: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            monitor_cancel: CancellationToken::new(),
            monitor_handle: Mutex::new(None),
        })
    }

    /// Launch and pre-warm every browser, then start the monitor loop
    ///
    /// # Errors
    ///
    /// Fails only if not a single browser could be launched.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        info!(
            browsers = self.settings.browsers,
            pages_per_browser = self.settings.pages_per_browser,
            "Starting browser pool"
        );

        let results =
            futures::future::join_all((0..self.settings.browsers).map(|_| self.launch_slot())).await;

        let mut launched = 0;
        for result in results {
            match result {
                Ok((slot, pages)) => {
                    self.browsers.lock().push(slot);
                    self.idle.lock().extend(pages);
                    launched += 1;
                }
                Err(e) => warn!("Failed to launch browser for pool: {e:#}"),
            }
        }
        if launched == 0 {
            anyhow::bail!("browser pool could not launch any browser");
        }
        self.metrics.set_active_browsers(launched);

        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move { monitor_loop(pool).await });
        *self.monitor_handle.lock() = Some(handle);

        info!(
            "Browser pool started with {launched} browsers and {} idle pages",
            self.idle.lock().len()
        );
        Ok(())
    }

    /// Launch one browser and open its pages
    async fn launch_slot(&self) -> anyhow::Result<(BrowserSlot, Vec<PooledPage>)> {
        let id = self.next_browser_id.fetch_add(1, Ordering::Relaxed);
        let proxy = if self.settings.use_proxy {
            self.proxies.as_ref().and_then(|p| p.pick_healthy())
        } else {
            None
        };

        let instance: Arc<dyn BrowserInstance> =
            Arc::from(self.launcher.launch(proxy.as_deref()).await?);
        let alive = Arc::new(AtomicBool::new(true));

        let mut pages = Vec::with_capacity(self.settings.pages_per_browser);
        for _ in 0..self.settings.pages_per_browser {
            match instance.open_page().await {
                Ok(driver) => pages.push(PooledPage {
                    id: self.next_page_id.fetch_add(1, Ordering::Relaxed),
                    browser_id: id,
                    alive: Arc::clone(&alive),
                    driver: Arc::from(driver),
                }),
                Err(e) => warn!("Browser {id} failed to pre-warm a page: {e:#}"),
            }
        }
        debug!("Launched browser {id} with {} pages", pages.len());

        Ok((
            BrowserSlot {
                id,
                instance,
                alive,
                proxy,
                launched_at: Instant::now(),
            },
            pages,
        ))
    }

    /// Check out a page, waiting up to the configured timeout
    ///
    /// The page is reconfigured with a fresh [`Fingerprint`] before it is
    /// returned. Dropping the lease checks the page back in.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when the wait times out, the pool is shut down, or no
    /// live browser can provide a page.
    pub async fn checkout(self: &Arc<Self>) -> ScrapeResult<PageLease> {
        let timeout = self.settings.checkout_timeout();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ScrapeError::resource_exhausted("browser page (pool shut down)", Duration::ZERO));
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(ScrapeError::resource_exhausted(
                    "browser page (pool shut down)",
                    started.elapsed(),
                ));
            }
            Err(_elapsed) => {
                warn!("Browser pool exhausted, checkout timed out after {timeout:?}");
                return Err(ScrapeError::resource_exhausted("browser page", timeout));
            }
        };

        let page = match self.take_idle_page() {
            Some(page) => page,
            None => self.open_replacement_page().await.map_err(|e| {
                warn!("No page available from live browsers: {e:#}");
                ScrapeError::resource_exhausted("browser page (no live browser)", started.elapsed())
            })?,
        };

        // From here on a dropped checkout future still returns the page
        self.checked_out.fetch_add(1, Ordering::AcqRel);
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        let (page_id, browser_id, driver) = (page.id, page.browser_id, Arc::clone(&page.driver));
        let lease = PageLease {
            page: Some(page),
            fingerprint: Fingerprint::random(),
            pool: Arc::clone(self),
            _permit: permit,
        };

        if let Err(e) = driver.configure(&lease.fingerprint).await {
            // A page without the override still works, it is just easier to correlate
            warn!(page = page_id, "Failed to apply session fingerprint: {e:#}");
            self.metrics.record_error(ErrorKind::Internal);
        }
        debug!(page = page_id, browser = browser_id, "Checked out page");

        Ok(lease)
    }

    /// Return a page explicitly; equivalent to dropping the lease
    pub fn checkin(&self, lease: PageLease) {
        drop(lease);
    }

    fn take_idle_page(&self) -> Option<PooledPage> {
        let mut idle = self.idle.lock();
        while let Some(page) = idle.pop_front() {
            if page.is_stale() {
                spawn_close_page(page);
                continue;
            }
            return Some(page);
        }
        None
    }

    /// Open a page on the oldest live browser
    async fn open_replacement_page(&self) -> anyhow::Result<PooledPage> {
        let target = {
            let browsers = self.browsers.lock();
            browsers
                .iter()
                .filter(|b| b.alive.load(Ordering::Acquire))
                .min_by_key(|b| b.launched_at)
                .map(|b| (b.id, Arc::clone(&b.instance), Arc::clone(&b.alive)))
        };
        let Some((browser_id, instance, alive)) = target else {
            anyhow::bail!("no live browser in pool");
        };
        let driver = instance.open_page().await?;
        Ok(PooledPage {
            id: self.next_page_id.fetch_add(1, Ordering::Relaxed),
            browser_id,
            alive,
            driver: Arc::from(driver),
        })
    }

    fn release(&self, page: PooledPage) {
        self.checked_out.fetch_sub(1, Ordering::AcqRel);
        self.checkins.fetch_add(1, Ordering::Relaxed);

        if page.is_stale() || self.shutdown.load(Ordering::Acquire) {
            debug!(page = page.id, "Discarding page on checkin");
            spawn_close_page(page);
            return;
        }
        debug!(page = page.id, "Page checked back in");
        self.idle.lock().push_back(page);
    }

    /// Verify every browser once and replace the disconnected ones
    pub async fn check_browsers(&self) {
        let snapshot: Vec<(u64, Arc<dyn BrowserInstance>)> = self
            .browsers
            .lock()
            .iter()
            .map(|b| (b.id, Arc::clone(&b.instance)))
            .collect();

        for (id, instance) in snapshot {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            if instance.is_connected().await {
                continue;
            }

            warn!("Browser {id} disconnected, replacing it");
            self.metrics.record_error(ErrorKind::StaleResource);

            let removed = {
                let mut browsers = self.browsers.lock();
                browsers
                    .iter()
                    .position(|b| b.id == id)
                    .map(|idx| browsers.remove(idx))
            };
            if let Some(slot) = &removed {
                slot.alive.store(false, Ordering::Release);
                if let Some(proxy) = &slot.proxy
                    && let Some(registry) = &self.proxies
                {
                    registry.mark_unhealthy(proxy);
                }
            }
            self.idle.lock().retain(|p| p.browser_id != id);
            if let Err(e) = instance.close().await {
                debug!("Closing disconnected browser {id} failed: {e:#}");
            }

            match self.launch_slot().await {
                Ok((slot, pages)) => {
                    info!("Browser {id} replaced by browser {}", slot.id);
                    self.browsers.lock().push(slot);
                    self.idle.lock().extend(pages);
                    self.respawns.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("Failed to respawn browser after {id} disconnected: {e:#}"),
            }
        }
        self.metrics.set_active_browsers(self.browsers.lock().len());
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            browsers: self.browsers.lock().len(),
            idle_pages: self.idle.lock().len(),
            checked_out: self.checked_out.load(Ordering::Acquire),
            capacity: self.settings.capacity(),
            respawns: self.respawns.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
        }
    }

    /// Stop the monitor, close idle pages and every browser
    pub async fn shutdown(&self) {
        info!("Shutting down browser pool");
        self.shutdown.store(true, Ordering::Release);
        self.permits.close();
        self.monitor_cancel.cancel();
        let handle = self.monitor_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let pages: Vec<PooledPage> = self.idle.lock().drain(..).collect();
        for page in pages {
            let _ = page.driver.close().await;
        }

        let browsers: Vec<BrowserSlot> = self.browsers.lock().drain(..).collect();
        for slot in browsers {
            slot.alive.store(false, Ordering::Release);
            if let Err(e) = slot.instance.close().await {
                warn!("Failed to close browser {}: {e:#}", slot.id);
            }
        }
        self.metrics.set_active_browsers(0);
        info!("Browser pool shutdown complete");
    }
}

fn spawn_close_page(page: PooledPage) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            let _ = page.driver.close().await;
        });
    }
}

// =============================================================================
// RAII Lease
// =============================================================================

/// A checked-out page; returned to the pool when dropped
pub struct PageLease {
    page: Option<PooledPage>,
    fingerprint: Fingerprint,
    pool: Arc<BrowserPool>,
    // Released after the page is back in the idle queue
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PageLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLease")
            .field("page", &self.page_id())
            .field("browser", &self.page.as_ref().map(|p| p.browser_id))
            .field("stale", &self.is_stale())
            .finish_non_exhaustive()
    }
}

impl PageLease {
    fn page(&self) -> ScrapeResult<&PooledPage> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| ScrapeError::StaleResource("page lease already released".into()))?;
        if page.is_stale() {
            return Err(ScrapeError::StaleResource(format!(
                "page {} belonged to browser {} which was replaced",
                page.id, page.browser_id
            )));
        }
        Ok(page)
    }

    /// Navigate the leased page
    ///
    /// # Errors
    ///
    /// `StaleResource` when the owning browser was replaced; navigation
    /// failures are returned as `anyhow` errors for the caller to classify.
    pub async fn navigate(&self, url: &str) -> ScrapeResult<anyhow::Result<String>> {
        let driver = Arc::clone(&self.page()?.driver);
        Ok(driver.navigate(url).await)
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.page.as_ref().is_none_or(PooledPage::is_stale)
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn page_id(&self) -> Option<u64> {
        self.page.as_ref().map(|p| p.id)
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.pool.release(page);
        }
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Periodically verify browsers are connected and replace the ones that are not
async fn monitor_loop(pool: Arc<BrowserPool>) {
    let mut interval =
        tokio::time::interval(pool.settings.monitor_interval().max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; browsers were just launched
    interval.tick().await;

    loop {
        tokio::select! {
            () = pool.monitor_cancel.cancelled() => break,
            _ = interval.tick() => pool.check_browsers().await,
        }
    }
    debug!("Browser monitor loop exiting");
}
