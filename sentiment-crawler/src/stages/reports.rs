use backoff::backoff::{Backoff, Constant};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::artifacts::artifact_path;
use crate::fetcher::FetchLimits;
use crate::pagination::{panic_message, PageOutcome, PagedSession};
use crate::parser::{ReportListing, ReportParser, REPORT_ITEM_SELECTOR};
use crate::stages::StageContext;
use crate::types::{Record, ReportMeta, Result, Stage, StageReport};
use crate::utils::url::{document_extension, resolve};

/// Search for research reports, download each document once and record
/// its metadata. Documents already present in the artifact store are
/// neither downloaded nor recorded again.
pub async fn run(ctx: &StageContext) -> Result<StageReport> {
    let started = Instant::now();
    let mut report = StageReport::new(Stage::Reports);

    if ctx.page_url(&ctx.settings.urls.report_search, 1, None).is_none() {
        info!(instrument = %ctx.instrument.code, "No report search template configured, skipping reports");
        return Ok(report.finish(started.elapsed()));
    }

    info!(instrument = %ctx.instrument.code, pages = ctx.settings.pages, "Searching reports");
    let mut session = ctx.open_session(Stage::Reports).await?;
    let crawled = AssertUnwindSafe(crawl_reports(ctx, &mut session, &mut report))
        .catch_unwind()
        .await;
    session.close().await;

    if let Err(payload) = crawled {
        let message = panic_message(payload);
        error!(instrument = %ctx.instrument.code, error = %message, "Report crawl raised");
        report.raised = Some(message);
    }

    info!(
        instrument = %ctx.instrument.code,
        saved = report.records_saved,
        dropped = report.records_dropped,
        "Report crawl finished"
    );
    Ok(report.finish(started.elapsed()))
}

async fn crawl_reports(ctx: &StageContext, session: &mut PagedSession, report: &mut StageReport) {
    for page in 1..=ctx.settings.pages {
        let Some(url) = ctx.page_url(&ctx.settings.urls.report_search, page, None) else {
            return;
        };
        report.pages_attempted += 1;

        let items = match session.load(page, &url, REPORT_ITEM_SELECTOR).await {
            PageOutcome::Ready(items) => items,
            PageOutcome::TimedOut | PageOutcome::Failed(_) => {
                report.pages_skipped += 1;
                continue;
            }
        };
        report.pages_succeeded += 1;

        for item in &items {
            let Some(listing) = ReportParser::parse(item) else {
                debug!(instrument = %ctx.instrument.code, stage = %report.stage, page, "Dropping unparseable report entry");
                report.records_dropped += 1;
                continue;
            };
            handle_listing(ctx, &url, listing, report).await;
        }
    }
}

async fn handle_listing(ctx: &StageContext, page_url: &str, listing: ReportListing, report: &mut StageReport) {
    let Some(link) = resolve(page_url, &listing.link) else {
        debug!(instrument = %ctx.instrument.code, stage = %report.stage, link = %listing.link, "Dropping unresolvable report link");
        report.records_dropped += 1;
        return;
    };
    let Some(extension) = document_extension(&link, &ctx.settings.download.extensions) else {
        debug!(instrument = %ctx.instrument.code, %link, "Report link is not a document, skipping");
        return;
    };

    let path = artifact_path(&ctx.settings.artifact_root, &ctx.instrument.code, &listing.title, &extension);
    match ctx.artifacts.exists(&path).await {
        Ok(true) => {
            debug!(path = %path.display(), "Report already downloaded");
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Artifact lookup failed, skipping report");
            return;
        }
    }

    if let Err(reason) = download(ctx, &link, &path).await {
        warn!(instrument = %ctx.instrument.code, %link, error = %reason, "Report download failed");
        report.records_dropped += 1;
        return;
    }

    let meta = ReportMeta {
        title: listing.title,
        source_url: link,
        downloaded_at: Utc::now(),
        artifact_path: path.display().to_string(),
    };
    ctx.persist(Record::Report(meta), report).await;
}

/// Fetch and store one document, retrying the whole fetch-and-write with a
/// constant pause. A document over the size limit is not retried.
async fn download(ctx: &StageContext, link: &str, path: &Path) -> std::result::Result<(), String> {
    let policy = &ctx.settings.download;
    let limits = FetchLimits {
        timeout: Some(policy.timeout()),
        max_bytes: Some(policy.max_bytes),
    };
    let mut pause = Constant::new(policy.pause());
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match ctx.fetcher.fetch_limited(link, limits).await {
            Ok(document) => match ctx.artifacts.write(path, &document.bytes).await {
                Ok(()) => {
                    info!(instrument = %ctx.instrument.code, path = %path.display(), bytes = document.bytes.len(), "Report saved");
                    return Ok(());
                }
                Err(e) => last_error = format!("{e:#}"),
            },
            Err(failure) if failure.too_large => return Err(failure.to_string()),
            Err(failure) => last_error = failure.to_string(),
        }
        if attempt < attempts {
            if let Some(delay) = pause.next_backoff() {
                debug!(link, attempt, "Retrying report download in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_error)
}
