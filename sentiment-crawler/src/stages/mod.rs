//! The four extraction procedures run for each instrument, in order:
//! post discovery, linked comment lookup, report documents and news.

pub mod comments;
pub mod discovery;
pub mod news;
pub mod reports;

use std::sync::Arc;
use tracing::warn;

use crate::fetcher::Fetcher;
use crate::identity::session_identity;
use crate::pagination::PagedSession;
use crate::settings::CrawlSettings;
use crate::types::{
    ArtifactStore, Instrument, Record, RecordStore, RenderEngine, Result, Scope, Stage, StageReport,
};
use crate::utils::url::{encode_component, fill_template};

/// Everything a stage needs for one instrument. Cloning shares the
/// collaborators; render sessions are never shared.
#[derive(Clone)]
pub struct StageContext {
    pub instrument: Instrument,
    pub settings: Arc<CrawlSettings>,
    pub store: Arc<dyn RecordStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub engine: Arc<dyn RenderEngine>,
    pub fetcher: Arc<Fetcher>,
}

impl StageContext {
    pub fn scope(&self, record: &Record) -> Scope {
        Scope::new(self.instrument.code.clone(), record.kind())
    }

    /// Fill a URL template for this instrument. `None` when the template is
    /// empty, which disables the stage using it.
    pub fn page_url(&self, template: &str, page: u32, post_id: Option<&str>) -> Option<String> {
        if template.trim().is_empty() {
            return None;
        }
        let page = page.to_string();
        let name = encode_component(&self.instrument.name);
        Some(fill_template(
            template,
            &[
                ("code", self.instrument.code.as_str()),
                ("name", name.as_str()),
                ("page", page.as_str()),
                ("post_id", post_id.unwrap_or_default()),
            ],
        ))
    }

    /// Open a render session with a freshly drawn identity.
    pub async fn open_session(&self, stage: Stage) -> Result<PagedSession> {
        let identity = session_identity(&self.settings.fetch, &mut rand::rng());
        PagedSession::open(
            self.engine.as_ref(),
            &identity,
            stage,
            &self.instrument,
            &self.settings.render,
        )
        .await
    }

    /// Write one record. A failure is logged and counted, never propagated.
    pub async fn persist(&self, record: Record, report: &mut StageReport) -> bool {
        let scope = self.scope(&record);
        match self.store.insert(&scope, &record).await {
            Ok(_) => {
                report.records_saved += 1;
                true
            }
            Err(e) => {
                warn!(instrument = %self.instrument.code, stage = %report.stage, %scope, error = %e, "Failed to persist record");
                report.persist_failures += 1;
                false
            }
        }
    }
}
