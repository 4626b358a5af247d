use chrono::Local;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::pagination::{panic_message, PageOutcome, PagedSession};
use crate::parser::{PostParser, POST_ROW_SELECTOR};
use crate::stages::StageContext;
use crate::types::{DateWindow, Record, Result, Stage, StageReport};

/// Walk the first `pages` listing pages, persist every parseable post and
/// derive the date window from the posts seen.
///
/// Only a session setup failure is returned as an error. Anything raised
/// while crawling yields an empty window and a report with `raised` set.
pub async fn run(ctx: &StageContext) -> Result<(DateWindow, StageReport)> {
    let started = Instant::now();
    let mut report = StageReport::new(Stage::Discovery);

    if ctx.page_url(&ctx.settings.urls.listing, 1, None).is_none() {
        info!(instrument = %ctx.instrument.code, "No listing template configured, skipping discovery");
        return Ok((DateWindow::default(), report.finish(started.elapsed())));
    }

    info!(instrument = %ctx.instrument.code, pages = ctx.settings.pages, "Discovering posts");
    let mut session = ctx.open_session(Stage::Discovery).await?;
    let mut window = DateWindow::default();

    let crawled = AssertUnwindSafe(crawl_listing(ctx, &mut session, &mut window, &mut report))
        .catch_unwind()
        .await;
    session.close().await;

    let window = match crawled {
        Ok(()) => window,
        Err(payload) => {
            let message = panic_message(payload);
            error!(instrument = %ctx.instrument.code, error = %message, "Post discovery raised, window discarded");
            report.raised = Some(message);
            DateWindow::default()
        }
    };

    info!(
        instrument = %ctx.instrument.code,
        saved = report.records_saved,
        dropped = report.records_dropped,
        skipped_pages = report.pages_skipped,
        %window,
        "Post discovery finished"
    );
    Ok((window, report.finish(started.elapsed())))
}

async fn crawl_listing(
    ctx: &StageContext,
    session: &mut PagedSession,
    window: &mut DateWindow,
    report: &mut StageReport,
) {
    let parser = PostParser::new(Local::now().date_naive());

    for page in 1..=ctx.settings.pages {
        let Some(url) = ctx.page_url(&ctx.settings.urls.listing, page, None) else {
            return;
        };
        report.pages_attempted += 1;

        let rows = match session.load(page, &url, POST_ROW_SELECTOR).await {
            PageOutcome::Ready(rows) => rows,
            PageOutcome::TimedOut | PageOutcome::Failed(_) => {
                report.pages_skipped += 1;
                continue;
            }
        };
        report.pages_succeeded += 1;

        for row in &rows {
            let Some(post) = parser.parse(row) else {
                debug!(instrument = %ctx.instrument.code, stage = %report.stage, page, "Dropping unparseable listing row");
                report.records_dropped += 1;
                continue;
            };
            window.observe(post.post_date);
            ctx.persist(Record::Post(post), report).await;
        }
    }
}
