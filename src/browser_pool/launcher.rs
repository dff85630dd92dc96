//! Browser backend seam
//!
//! The pool only talks to [`BrowserLauncher`], [`BrowserInstance`] and
//! [`PageDriver`]. [`ChromiumLauncher`] is the production backend on top of
//! chromiumoxide; tests plug in in-memory fakes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::{Page, cdp};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;
use crate::utils::constants::CHROME_USER_AGENT;

/// Starts browser instances, optionally bound to a proxy
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, proxy: Option<&str>) -> Result<Box<dyn BrowserInstance>>;
}

/// A running browser
#[async_trait]
pub trait BrowserInstance: Send + Sync {
    /// Cheap liveness check used by the pool monitor
    async fn is_connected(&self) -> bool;
    async fn open_page(&self) -> Result<Box<dyn PageDriver>>;
    async fn close(&self) -> Result<()>;
}

/// A single tab
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Apply a session fingerprint before the page is handed out
    async fn configure(&self, fingerprint: &Fingerprint) -> Result<()>;
    /// Navigate and return the rendered document
    async fn navigate(&self, url: &str) -> Result<String>;
    async fn close(&self) -> Result<()>;
}

// =============================================================================
// chromiumoxide backend
// =============================================================================

/// Launches headless Chrome through chromiumoxide
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(headless: bool, chrome_executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            headless,
            chrome_executable,
            request_timeout,
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, proxy: Option<&str>) -> Result<Box<dyn BrowserInstance>> {
        let user_data_dir =
            std::env::temp_dir().join(format!("trendscrape_chrome_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&user_data_dir).context("Failed to create user data directory")?;

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(self.request_timeout)
            .window_size(1920, 1080)
            .user_data_dir(user_data_dir.clone())
            .arg(format!("--user-agent={CHROME_USER_AGENT}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-notifications")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-breakpad")
            .arg("--password-store=basic")
            .arg("--use-mock-keychain")
            .arg("--mute-audio");

        builder = if self.headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path.clone());
        }
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e:?}");
                }
            }
            info!("Browser event handler task completed");
        });

        Ok(Box::new(ChromiumBrowser {
            browser: Mutex::new(browser),
            handler: handler_task,
            user_data_dir,
        }))
    }
}

/// chromiumoxide browser plus its tracked event-handler task
struct ChromiumBrowser {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

#[async_trait]
impl BrowserInstance for ChromiumBrowser {
    async fn is_connected(&self) -> bool {
        if self.handler.is_finished() {
            return false;
        }
        self.browser.lock().await.version().await.is_ok()
    }

    async fn open_page(&self) -> Result<Box<dyn PageDriver>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser cleanly: {e}");
        }
        let _ = browser.wait().await;
        Ok(())
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!(
                "Failed to clean up temp directory {}: {e}",
                self.user_data_dir.display()
            );
        }
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn configure(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.page
            .execute(cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams {
                source: fingerprint.init_script(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await?;

        self.page
            .execute(cdp::browser_protocol::network::SetUserAgentOverrideParams {
                user_agent: fingerprint.user_agent.clone(),
                accept_language: Some(fingerprint.accept_language.clone()),
                platform: Some(fingerprint.platform.clone()),
                user_agent_metadata: None,
            })
            .await?;

        self.page
            .execute(
                cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
                    .width(i64::from(fingerprint.viewport_width))
                    .height(i64::from(fingerprint.viewport_height))
                    .device_scale_factor(1.0)
                    .mobile(false)
                    .build()
                    .map_err(anyhow::Error::msg)?,
            )
            .await?;

        self.page
            .execute(cdp::browser_protocol::emulation::SetTimezoneOverrideParams::new(
                fingerprint.timezone.clone(),
            ))
            .await?;

        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<String> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Navigation to {url} failed"))?;
        self.page
            .wait_for_navigation()
            .await
            .with_context(|| format!("Waiting for {url} to load failed"))?;
        self.page
            .content()
            .await
            .with_context(|| format!("Reading content of {url} failed"))
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await.context("Failed to close page")
    }
}
