use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use interfaces::{
    ArtifactStore, Comment, DateWindow, Instrument, NewsItem, Post, Predicate, RawElement,
    Readiness, Record, RecordKind, RecordStore, RenderEngine, RenderSession, ReportMeta, Scope,
    SessionIdentity, StoredRecord,
};

/// The four extraction procedures of an instrument pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Comments,
    Reports,
    News,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::Comments => "comments",
            Stage::Reports => "reports",
            Stage::News => "news",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub pages_attempted: u32,
    pub pages_succeeded: u32,
    pub pages_skipped: u32,
    pub records_saved: usize,
    pub records_dropped: usize,
    pub persist_failures: usize,
    /// Set when the stage body raised; already-saved records stay saved.
    pub raised: Option<String>,
    pub elapsed_ms: u64,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            pages_attempted: 0,
            pages_succeeded: 0,
            pages_skipped: 0,
            records_saved: 0,
            records_dropped: 0,
            persist_failures: 0,
            raised: None,
            elapsed_ms: 0,
        }
    }

    pub fn finish(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentReport {
    pub instrument: Instrument,
    pub window: DateWindow,
    pub stages: Vec<StageReport>,
    /// Fatal setup failure that cut this pipeline short.
    pub aborted: Option<String>,
    pub elapsed_ms: u64,
}

impl InstrumentReport {
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            window: DateWindow::default(),
            stages: Vec::new(),
            aborted: None,
            elapsed_ms: 0,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn records_saved(&self) -> usize {
        self.stages.iter().map(|s| s.records_saved).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub concurrent: bool,
    pub instruments: Vec<InstrumentReport>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn aborted(&self) -> impl Iterator<Item = &InstrumentReport> {
        self.instruments.iter().filter(|r| r.aborted.is_some())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Setup failed for {instrument}: {reason}")]
    Setup { instrument: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CrawlerError {
    pub fn setup(instrument: &Instrument, reason: impl fmt::Display) -> Self {
        CrawlerError::Setup {
            instrument: instrument.code.clone(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
