use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::fetcher::Fetcher;
use crate::pagination::panic_message;
use crate::settings::{check_instrument, CrawlSettings};
use crate::stages::{self, StageContext};
use crate::types::{
    ArtifactStore, Instrument, InstrumentReport, RecordStore, RenderEngine, Result, RunSummary,
};

/// Shared collaborators handed to every instrument pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub engine: Arc<dyn RenderEngine>,
    pub fetcher: Arc<Fetcher>,
}

/// Runs the fixed stage sequence for each configured instrument, either one
/// instrument at a time or all at once.
pub struct Orchestrator {
    settings: Arc<CrawlSettings>,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(settings: CrawlSettings, collaborators: Collaborators) -> Self {
        Self {
            settings: Arc::new(settings),
            collaborators,
        }
    }

    fn context(&self, instrument: &Instrument) -> StageContext {
        StageContext {
            instrument: instrument.clone(),
            settings: Arc::clone(&self.settings),
            store: Arc::clone(&self.collaborators.store),
            artifacts: Arc::clone(&self.collaborators.artifacts),
            engine: Arc::clone(&self.collaborators.engine),
            fetcher: Arc::clone(&self.collaborators.fetcher),
        }
    }

    pub async fn run(&self) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let concurrent = self.settings.concurrent;
        info!(
            instruments = self.settings.instruments.len(),
            concurrent,
            pages = self.settings.pages,
            "Starting crawl"
        );

        let instruments = if concurrent {
            self.run_concurrent().await
        } else {
            self.run_sequential().await
        };

        let summary = RunSummary {
            started_at,
            concurrent,
            instruments,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            instruments = summary.instruments.len(),
            aborted = summary.aborted().count(),
            elapsed_ms = summary.elapsed_ms,
            "Crawl finished"
        );
        summary
    }

    /// One instrument after another with a fixed pause in between. Each
    /// pipeline still runs on its own task so a panic stays contained.
    pub async fn run_sequential(&self) -> Vec<InstrumentReport> {
        let pause = Duration::from_millis(self.settings.instrument_pause_ms);
        let mut reports = Vec::with_capacity(self.settings.instruments.len());
        for (i, instrument) in self.settings.instruments.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let handle = tokio::spawn(run_instrument(self.context(instrument)));
            reports.push(join(instrument, handle).await);
        }
        reports
    }

    /// Every instrument on its own task; waits for all of them.
    pub async fn run_concurrent(&self) -> Vec<InstrumentReport> {
        let handles: Vec<_> = self
            .settings
            .instruments
            .iter()
            .map(|instrument| {
                let handle = tokio::spawn(run_instrument(self.context(instrument)));
                (instrument, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (instrument, handle) in handles {
            reports.push(join(instrument, handle).await);
        }
        reports
    }
}

async fn join(instrument: &Instrument, handle: JoinHandle<InstrumentReport>) -> InstrumentReport {
    match handle.await {
        Ok(report) => report,
        Err(e) => {
            let reason = if e.is_panic() {
                format!("pipeline panicked: {}", panic_message(e.into_panic()))
            } else {
                format!("pipeline cancelled: {e}")
            };
            error!(instrument = %instrument.code, error = %reason, "Instrument pipeline died");
            let mut report = InstrumentReport::new(instrument.clone());
            report.aborted = Some(reason);
            report
        }
    }
}

/// Run every enabled stage for one instrument. A setup failure stops this
/// instrument only; stages already finished keep their reports.
pub async fn run_instrument(ctx: StageContext) -> InstrumentReport {
    let started = Instant::now();
    let mut report = InstrumentReport::new(ctx.instrument.clone());
    info!(instrument = %ctx.instrument, "Instrument pipeline started");

    if let Err(reason) = check_instrument(&ctx.instrument) {
        warn!(instrument = %ctx.instrument.code, %reason, "Rejecting instrument");
        report.aborted = Some(reason);
        return report;
    }

    if let Err(e) = run_stages(&ctx, &mut report).await {
        error!(instrument = %ctx.instrument.code, error = %e, "Instrument pipeline aborted");
        report.aborted = Some(e.to_string());
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        instrument = %ctx.instrument,
        window = %report.window,
        saved = report.records_saved(),
        elapsed_ms = report.elapsed_ms,
        "Instrument pipeline finished"
    );
    report
}

async fn run_stages(ctx: &StageContext, report: &mut InstrumentReport) -> Result<()> {
    let toggles = &ctx.settings.stages;

    let (window, discovery) = stages::discovery::run(ctx).await?;
    report.window = window;
    report.stages.push(discovery);

    if toggles.comments {
        report.stages.push(stages::comments::run(ctx, window).await?);
    }
    if toggles.reports {
        report.stages.push(stages::reports::run(ctx).await?);
    }
    if toggles.news {
        report.stages.push(stages::news::run(ctx).await?);
    }
    Ok(())
}
