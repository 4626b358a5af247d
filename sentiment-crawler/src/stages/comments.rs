use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::pagination::{panic_message, PageOutcome, PagedSession};
use crate::parser::{CommentParser, COMMENT_SELECTOR};
use crate::stages::StageContext;
use crate::types::{
    DateWindow, Post, Predicate, Record, RecordKind, Result, Scope, Stage, StageReport,
};

/// Field of the post payload the date window is matched against.
pub const POST_DATE_FIELD: &str = "post_date";

/// Fetch comments for the posts persisted inside `window`.
///
/// An incomplete window makes this a no-op: no store query and no render
/// session.
pub async fn run(ctx: &StageContext, window: DateWindow) -> Result<StageReport> {
    let started = Instant::now();
    let mut report = StageReport::new(Stage::Comments);

    let Some((start, end)) = window.bounds() else {
        info!(instrument = %ctx.instrument.code, "No date window, skipping comment lookup");
        return Ok(report.finish(started.elapsed()));
    };
    if ctx.settings.urls.comment.trim().is_empty() {
        info!(instrument = %ctx.instrument.code, "No comment template configured, skipping comment lookup");
        return Ok(report.finish(started.elapsed()));
    }

    let scope = Scope::new(ctx.instrument.code.clone(), RecordKind::Post);
    let predicate = Predicate::date_range(POST_DATE_FIELD, start, end);
    let matched = match ctx.store.query(&scope, &predicate).await {
        Ok(matched) => matched,
        Err(e) => {
            warn!(instrument = %ctx.instrument.code, %window, error = %e, "Post lookup failed, skipping comments");
            report.raised = Some(format!("post lookup failed: {e:#}"));
            return Ok(report.finish(started.elapsed()));
        }
    };

    let limit = ctx.settings.comment_post_limit.unwrap_or(usize::MAX);
    let targets: Vec<Post> = matched
        .into_iter()
        .filter_map(|stored| match stored.record {
            Record::Post(post) => Some(post),
            _ => None,
        })
        .take(limit)
        .collect();
    info!(instrument = %ctx.instrument.code, %window, posts = targets.len(), "Looking up comments");
    if targets.is_empty() {
        return Ok(report.finish(started.elapsed()));
    }

    let mut session = ctx.open_session(Stage::Comments).await?;
    let crawled = AssertUnwindSafe(crawl_comments(ctx, &mut session, &targets, &mut report))
        .catch_unwind()
        .await;
    session.close().await;

    if let Err(payload) = crawled {
        let message = panic_message(payload);
        error!(instrument = %ctx.instrument.code, error = %message, "Comment lookup raised");
        report.raised = Some(message);
    }

    info!(
        instrument = %ctx.instrument.code,
        saved = report.records_saved,
        dropped = report.records_dropped,
        "Comment lookup finished"
    );
    Ok(report.finish(started.elapsed()))
}

async fn crawl_comments(
    ctx: &StageContext,
    session: &mut PagedSession,
    posts: &[Post],
    report: &mut StageReport,
) {
    for (index, post) in posts.iter().enumerate() {
        let Some(post_id) = post.post_id.as_deref() else {
            debug!(instrument = %ctx.instrument.code, stage = %report.stage, title = %post.title, "Post has no site id, cannot locate its comments");
            report.records_dropped += 1;
            continue;
        };
        let Some(url) = ctx.page_url(&ctx.settings.urls.comment, 1, Some(post_id)) else {
            return;
        };
        report.pages_attempted += 1;

        let items = match session.load(index as u32 + 1, &url, COMMENT_SELECTOR).await {
            PageOutcome::Ready(items) => items,
            PageOutcome::TimedOut | PageOutcome::Failed(_) => {
                report.pages_skipped += 1;
                continue;
            }
        };
        report.pages_succeeded += 1;

        for item in &items {
            let Some(mut comment) = CommentParser::parse(item) else {
                debug!(instrument = %ctx.instrument.code, stage = %report.stage, post_id, "Dropping unparseable comment");
                report.records_dropped += 1;
                continue;
            };
            comment.post_id = post_id.to_string();
            ctx.persist(Record::Comment(comment), report).await;
        }
    }
}
