//! Headless Chromium implementation of the rendering capability.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::settings::RenderConfig;
use crate::types::{RawElement, Readiness, RenderEngine, RenderSession, SessionIdentity};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches one Chromium process per session so each session carries its
/// own user agent, proxy and profile directory.
pub struct ChromeEngine {
    headless: bool,
    executable: Option<PathBuf>,
    request_timeout: Duration,
}

impl ChromeEngine {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            headless: config.headless,
            executable: config.chrome_executable.clone(),
            request_timeout: config.ready_timeout(),
        }
    }

    fn browser_config(&self, identity: &SessionIdentity, profile: &tempfile::TempDir) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", identity.user_agent))
            .user_data_dir(profile.path())
            .request_timeout(self.request_timeout);
        if let Some(proxy) = &identity.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {e}"))
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn open(&self, identity: &SessionIdentity) -> Result<Box<dyn RenderSession>> {
        let profile = tempfile::Builder::new()
            .prefix("sentiment-crawler-")
            .tempdir()
            .context("Failed to create browser profile directory")?;
        let config = self.browser_config(identity, &profile)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handle.abort();
                return Err(anyhow!("Failed to open page: {e}"));
            }
        };

        info!(proxy = ?identity.proxy, headless = self.headless, "Browser session opened");
        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            page,
            handle: Some(handle),
            _profile: profile,
        }))
    }

    fn name(&self) -> &str {
        "chromium"
    }
}

pub struct ChromeSession {
    browser: Option<Browser>,
    page: Page,
    handle: Option<JoinHandle<()>>,
    _profile: tempfile::TempDir,
}

#[async_trait]
impl RenderSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Navigation to {url} failed"))?;
        Ok(())
    }

    async fn await_ready(&mut self, selector: &str, timeout: Duration) -> Result<Readiness> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_elements(selector).await {
                Ok(found) if !found.is_empty() => return Ok(Readiness::Ready),
                Ok(_) => {}
                Err(e) => debug!(selector, error = %e, "Readiness check failed"),
            }
            if Instant::now() >= deadline {
                return Ok(Readiness::TimedOut);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn extract_all(&mut self, selector: &str) -> Result<Vec<RawElement>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("Query for {selector} failed"))?;
        let mut extracted = Vec::with_capacity(elements.len());
        for element in elements {
            match element.outer_html().await {
                Ok(Some(html)) => extracted.push(RawElement::new(html)),
                Ok(None) => {}
                Err(e) => debug!(selector, error = %e, "Element vanished before it was read"),
            }
        }
        Ok(extracted)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        let closed = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "Browser process did not exit cleanly");
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        closed.context("Failed to close browser")?;
        debug!("Browser session closed");
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
