use std::time::Instant;
use tracing::{debug, info, warn};

use crate::parser::NewsParser;
use crate::stages::StageContext;
use crate::types::{Record, Result, Stage, StageReport};

/// News search pages are plain documents; they go through the fetcher
/// rather than a render session.
pub async fn run(ctx: &StageContext) -> Result<StageReport> {
    let started = Instant::now();
    let mut report = StageReport::new(Stage::News);

    for page in 1..=ctx.settings.pages {
        let Some(url) = ctx.page_url(&ctx.settings.urls.news, page, None) else {
            info!(instrument = %ctx.instrument.code, "No news template configured, skipping news");
            break;
        };
        if page > 1 {
            ctx.settings.render.page_pause.sleep().await;
        }
        report.pages_attempted += 1;

        let document = match ctx.fetcher.get(&url).await {
            Ok(document) => document,
            Err(failure) => {
                warn!(instrument = %ctx.instrument.code, page, error = %failure, "News page unavailable, skipping");
                report.pages_skipped += 1;
                continue;
            }
        };
        report.pages_succeeded += 1;

        let list = NewsParser::parse_list(&document.text());
        if list.skipped > 0 {
            debug!(instrument = %ctx.instrument.code, stage = %report.stage, page, skipped = list.skipped, "Dropping incomplete news items");
            report.records_dropped += list.skipped;
        }
        for item in list.items {
            ctx.persist(Record::News(item), &mut report).await;
        }
    }

    info!(
        instrument = %ctx.instrument.code,
        saved = report.records_saved,
        dropped = report.records_dropped,
        "News crawl finished"
    );
    Ok(report.finish(started.elapsed()))
}
