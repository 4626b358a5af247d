//! Paginated traversal over one render session.
//!
//! A [`PagedSession`] owns its render session exclusively, moves through
//! `Created -> Navigating -> AwaitingReady -> Ready | TimedOut` once per page
//! and ends in `Closed`. A page that times out or fails is skipped; the
//! session stays usable for the next page.

use std::any::Any;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::settings::{PauseBounds, RenderConfig};
use crate::types::{
    CrawlerError, Instrument, RawElement, Readiness, RenderEngine, RenderSession, Result,
    SessionIdentity, Stage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Navigating { page: u32 },
    AwaitingReady { page: u32 },
    Ready { page: u32 },
    TimedOut { page: u32 },
    Closed,
}

#[derive(Debug)]
pub enum PageOutcome {
    Ready(Vec<RawElement>),
    TimedOut,
    Failed(String),
}

pub struct PagedSession {
    inner: Option<Box<dyn RenderSession>>,
    state: SessionState,
    stage: Stage,
    instrument: String,
    ready_timeout: Duration,
    page_pause: PauseBounds,
    loads: u32,
}

impl PagedSession {
    /// Open a fresh render session. Failure here is a setup failure for the
    /// instrument.
    pub async fn open(
        engine: &dyn RenderEngine,
        identity: &SessionIdentity,
        stage: Stage,
        instrument: &Instrument,
        render: &RenderConfig,
    ) -> Result<Self> {
        let inner = engine
            .open(identity)
            .await
            .map_err(|e| CrawlerError::setup(instrument, format!("{stage}: {e:#}")))?;
        debug!(instrument = %instrument.code, %stage, engine = engine.name(), "Render session opened");
        Ok(Self {
            inner: Some(inner),
            state: SessionState::Created,
            stage,
            instrument: instrument.code.clone(),
            ready_timeout: render.ready_timeout(),
            page_pause: render.page_pause,
            loads: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Load one page and extract every element matching `selector` once it
    /// appears. Consecutive loads are separated by the configured pause.
    pub async fn load(&mut self, page: u32, url: &str, selector: &str) -> PageOutcome {
        if self.loads > 0 {
            self.page_pause.sleep().await;
        }
        self.loads += 1;

        let Some(session) = self.inner.as_mut() else {
            return PageOutcome::Failed("session already closed".to_string());
        };

        self.state = SessionState::Navigating { page };
        if let Err(e) = session.navigate(url).await {
            warn!(instrument = %self.instrument, stage = %self.stage, page, url, error = %e, "Navigation failed, skipping page");
            self.state = SessionState::TimedOut { page };
            return PageOutcome::Failed(format!("{e:#}"));
        }

        self.state = SessionState::AwaitingReady { page };
        match session.await_ready(selector, self.ready_timeout).await {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::TimedOut) => {
                warn!(instrument = %self.instrument, stage = %self.stage, page, url, "Page not ready in time, skipping");
                self.state = SessionState::TimedOut { page };
                return PageOutcome::TimedOut;
            }
            Err(e) => {
                warn!(instrument = %self.instrument, stage = %self.stage, page, url, error = %e, "Ready wait failed, skipping page");
                self.state = SessionState::TimedOut { page };
                return PageOutcome::Failed(format!("{e:#}"));
            }
        }

        match session.extract_all(selector).await {
            Ok(elements) => {
                debug!(instrument = %self.instrument, stage = %self.stage, page, found = elements.len(), "Page ready");
                self.state = SessionState::Ready { page };
                PageOutcome::Ready(elements)
            }
            Err(e) => {
                warn!(instrument = %self.instrument, stage = %self.stage, page, url, error = %e, "Extraction failed, skipping page");
                self.state = SessionState::TimedOut { page };
                PageOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    /// Release the render session. Further calls are no-ops.
    pub async fn close(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        if let Err(e) = session.close().await {
            warn!(instrument = %self.instrument, stage = %self.stage, error = %e, "Render session close failed");
        }
        self.state = SessionState::Closed;
        info!(instrument = %self.instrument, stage = %self.stage, pages = self.loads, "Render session closed");
    }
}

impl Drop for PagedSession {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(instrument = %self.instrument, stage = %self.stage, "Render session dropped without close");
        }
    }
}

/// Readable message from a caught panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
