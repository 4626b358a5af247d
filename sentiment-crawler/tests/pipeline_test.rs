use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;

use sentiment_crawler::settings::{
    FetchConfig, PauseBounds, RenderConfig, StageToggles, UrlTemplates,
};
use sentiment_crawler::stages::{comments, StageContext};
use sentiment_crawler::testing::{MemoryArtifactStore, ScriptedRenderEngine};
use sentiment_crawler::{
    Collaborators, CrawlSettings, DateWindow, Fetcher, Instrument, MemoryStore, Orchestrator,
    Post, Predicate, Record, RecordKind, RecordStore, Scope, Stage,
};

const LISTING: &str = "http://board.test/list,{code}.html?page={page}";
const COMMENTS: &str = "http://board.test/news,{code},{post_id}.html";

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn listing_url(code: &str, page: u32) -> String {
    format!("http://board.test/list,{code}.html?page={page}")
}

fn comment_url(code: &str, post_id: &str) -> String {
    format!("http://board.test/news,{code},{post_id}.html")
}

fn post_row(code: &str, post_id: &str, day: &str) -> String {
    format!(
        r#"<tr>
            <td class="l3"><a href="/news,{code},{post_id}.html">帖子 {post_id}</a></td>
            <td class="l4"><a href="/user/{post_id}">作者{post_id}</a></td>
            <td class="l5">{day}</td>
            <td class="l6">10:00</td>
            <td class="l7"><span>3</span></td>
            <td class="l8"><span>1</span></td>
        </tr>"#
    )
}

fn comment_item(text: &str) -> String {
    format!(
        r#"<div class="article-item">
            <div class="user_name"><a>回复者</a></div>
            <div class="t_content">{text}</div>
            <span class="pub_time">2024-01-10 11:00</span>
            <span class="zan"><b>2</b></span>
        </div>"#
    )
}

fn settings(instruments: Vec<Instrument>, stages: StageToggles) -> CrawlSettings {
    CrawlSettings {
        instruments,
        pages: 2,
        stages,
        instrument_pause_ms: 0,
        comment_post_limit: None,
        urls: UrlTemplates {
            listing: LISTING.to_string(),
            comment: COMMENTS.to_string(),
            report_search: String::new(),
            news: String::new(),
        },
        render: RenderConfig {
            page_pause: PauseBounds::none(),
            ..RenderConfig::default()
        },
        fetch: FetchConfig {
            max_retries: 1,
            retry_pause: PauseBounds::new(1, 2),
            ..FetchConfig::default()
        },
        ..CrawlSettings::default()
    }
}

fn comments_only() -> StageToggles {
    StageToggles {
        comments: true,
        reports: false,
        news: false,
    }
}

fn orchestrator(
    settings: CrawlSettings,
    engine: &ScriptedRenderEngine,
    store: &Arc<MemoryStore>,
) -> Result<Orchestrator> {
    let collaborators = Collaborators {
        store: store.clone(),
        artifacts: Arc::new(MemoryArtifactStore::new()),
        engine: Arc::new(engine.clone()),
        fetcher: Arc::new(Fetcher::new(settings.fetch.clone())?),
    };
    Ok(Orchestrator::new(settings, collaborators))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

#[tokio::test]
async fn test_discovery_window_drives_comment_lookup() -> Result<()> {
    init_tracing();
    let code = "600036";
    let days: Vec<String> = (1..=10).map(|d| format!("2024-01-{d:02}")).collect();

    let page_one: Vec<String> = (0..5).map(|i| post_row(code, &format!("{}", 100 + i), &days[i])).collect();
    let page_two: Vec<String> = (5..10).map(|i| post_row(code, &format!("{}", 100 + i), &days[i])).collect();
    let mut engine = ScriptedRenderEngine::new()
        .on_page(listing_url(code, 1), page_one)
        .on_page(listing_url(code, 2), page_two);
    for i in 0..10 {
        let id = format!("{}", 100 + i);
        engine = engine.on_page(comment_url(code, &id), vec![comment_item(&format!("回复 {id}"))]);
    }
    engine = engine.on_page(comment_url(code, "999"), vec![comment_item("out of window")]);

    let store = Arc::new(MemoryStore::new());
    // Left over from an earlier run, outside the window.
    let stale = Record::Post(Post {
        title: "旧帖".to_string(),
        author: "someone".to_string(),
        post_date: date("2023-12-01"),
        post_time: "09:00".to_string(),
        reply_count: 0,
        like_count: 0,
        post_id: Some("999".to_string()),
    });
    store.insert(&Scope::new(code, RecordKind::Post), &stale).await?;

    let summary = orchestrator(
        settings(vec![Instrument::new(code, "招商银行")], comments_only()),
        &engine,
        &store,
    )?
    .run()
    .await;

    let report = &summary.instruments[0];
    assert!(report.aborted.is_none());
    assert_eq!(report.window, DateWindow::new(date("2024-01-01"), date("2024-01-10")));
    assert_eq!(report.stage(Stage::Discovery).unwrap().records_saved, 10);

    let queries = store.queries().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(
        queries[0].1,
        Predicate::date_range("post_date", date("2024-01-01"), date("2024-01-10"))
    );

    let comments = store.records(&Scope::new(code, RecordKind::Comment)).await;
    assert_eq!(comments.len(), 10);
    for stored in &comments {
        match &stored.record {
            Record::Comment(c) => assert_ne!(c.post_id, "999"),
            other => panic!("unexpected record {other:?}"),
        }
    }

    let log = engine.log();
    assert!(!log.navigations.contains(&comment_url(code, "999")));
    assert_eq!(log.opens, 2);
    assert_eq!(log.closes, log.opens);
    Ok(())
}

#[tokio::test]
async fn test_no_posts_means_no_comment_work() -> Result<()> {
    init_tracing();
    // Neither listing page ever becomes ready.
    let engine = ScriptedRenderEngine::new();
    let store = Arc::new(MemoryStore::new());

    let summary = orchestrator(
        settings(vec![Instrument::new("000858", "五粮液")], comments_only()),
        &engine,
        &store,
    )?
    .run()
    .await;

    let report = &summary.instruments[0];
    assert_eq!(report.window, DateWindow::default());
    let discovery = report.stage(Stage::Discovery).unwrap();
    assert_eq!(discovery.pages_skipped, 2);
    assert_eq!(report.stage(Stage::Comments).unwrap().pages_attempted, 0);

    assert!(store.queries().await.is_empty());
    let log = engine.log();
    assert_eq!(log.opens, 1, "only discovery opens a session");
    assert_eq!(log.navigations.len(), 2);
    assert_eq!(log.closes, 1);
    Ok(())
}

#[tokio::test]
async fn test_timed_out_page_is_skipped_not_fatal() -> Result<()> {
    init_tracing();
    let code = "600036";
    let first: Vec<String> = (1..=5).map(|d| post_row(code, &d.to_string(), &format!("2024-02-0{d}"))).collect();
    let third: Vec<String> = (6..=8).map(|d| post_row(code, &d.to_string(), &format!("2024-02-0{d}"))).collect();
    let engine = ScriptedRenderEngine::new()
        .on_page(listing_url(code, 1), first)
        .on_timeout(listing_url(code, 2))
        .on_page(listing_url(code, 3), third);
    let store = Arc::new(MemoryStore::new());

    let mut settings = settings(vec![Instrument::new(code, "招商银行")], comments_only());
    settings.pages = 3;
    settings.stages.comments = false;
    let summary = orchestrator(settings, &engine, &store)?.run().await;

    let report = &summary.instruments[0];
    let discovery = report.stage(Stage::Discovery).unwrap();
    assert_eq!(discovery.pages_attempted, 3);
    assert_eq!(discovery.pages_succeeded, 2);
    assert_eq!(discovery.pages_skipped, 1);
    assert_eq!(discovery.records_saved, 8);
    assert_eq!(report.window, DateWindow::new(date("2024-02-01"), date("2024-02-08")));
    assert_eq!(store.count(&Scope::new(code, RecordKind::Post)).await, 8);
    assert_eq!(engine.log().navigations, vec![
        listing_url(code, 1),
        listing_url(code, 2),
        listing_url(code, 3),
    ]);
    Ok(())
}

fn stage_context(code: &str, engine: &ScriptedRenderEngine, store: &Arc<MemoryStore>) -> Result<StageContext> {
    let settings = settings(vec![Instrument::new(code, "招商银行")], comments_only());
    Ok(StageContext {
        instrument: Instrument::new(code, "招商银行"),
        fetcher: Arc::new(Fetcher::new(settings.fetch.clone())?),
        settings: Arc::new(settings),
        store: store.clone(),
        artifacts: Arc::new(MemoryArtifactStore::new()),
        engine: Arc::new(engine.clone()),
    })
}

#[tokio::test]
async fn test_half_open_window_does_no_comment_work() -> Result<()> {
    init_tracing();
    let code = "600036";
    let engine = ScriptedRenderEngine::new().on_page(comment_url(code, "1"), vec![comment_item("不应抓取")]);
    let store = Arc::new(MemoryStore::new());
    let ctx = stage_context(code, &engine, &store)?;

    for window in [
        DateWindow::default(),
        DateWindow {
            start: Some(date("2024-01-01")),
            end: None,
        },
    ] {
        let report = comments::run(&ctx, window).await?;
        assert_eq!(report.pages_attempted, 0);
        assert!(report.raised.is_none());
    }

    assert!(store.queries().await.is_empty());
    assert_eq!(engine.log().operations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_raised_discovery_releases_session_and_drops_window() -> Result<()> {
    init_tracing();
    let code = "600036";
    let rows: Vec<String> = (1..=3).map(|d| post_row(code, &d.to_string(), &format!("2024-03-0{d}"))).collect();
    let engine = ScriptedRenderEngine::new()
        .on_page(listing_url(code, 1), rows)
        .on_panic(listing_url(code, 2), "renderer crashed");
    let store = Arc::new(MemoryStore::new());

    let summary = orchestrator(
        settings(vec![Instrument::new(code, "招商银行")], comments_only()),
        &engine,
        &store,
    )?
    .run()
    .await;

    let report = &summary.instruments[0];
    assert!(report.aborted.is_none());
    assert_eq!(report.window, DateWindow::default());
    let discovery = report.stage(Stage::Discovery).unwrap();
    assert_eq!(discovery.raised.as_deref(), Some("renderer crashed"));
    assert_eq!(discovery.records_saved, 3);

    assert!(store.queries().await.is_empty());
    let log = engine.log();
    assert_eq!(log.opens, 1);
    assert_eq!(log.closes, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_instrument_aborts_only_itself() -> Result<()> {
    init_tracing();
    let engine = ScriptedRenderEngine::new().on_page(
        listing_url("600036", 1),
        vec![post_row("600036", "1", "2024-04-01")],
    );
    let store = Arc::new(MemoryStore::new());

    let mut settings = settings(
        vec![Instrument::new("60003X", "坏代码"), Instrument::new("600036", "招商银行")],
        comments_only(),
    );
    settings.concurrent = true;
    let summary = orchestrator(settings, &engine, &store)?.run().await;

    assert!(summary.concurrent);
    assert_eq!(summary.instruments.len(), 2);
    assert!(summary.instruments[0].aborted.is_some());
    assert!(summary.instruments[0].stages.is_empty());
    assert!(summary.instruments[1].aborted.is_none());
    assert_eq!(summary.instruments[1].window, DateWindow::new(date("2024-04-01"), date("2024-04-01")));
    assert_eq!(summary.aborted().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_render_setup_failure_aborts_instrument() -> Result<()> {
    init_tracing();
    let engine = ScriptedRenderEngine::new().fail_open();
    let store = Arc::new(MemoryStore::new());

    let summary = orchestrator(
        settings(
            vec![Instrument::new("600036", "招商银行"), Instrument::new("000858", "五粮液")],
            comments_only(),
        ),
        &engine,
        &store,
    )?
    .run()
    .await;

    assert_eq!(summary.aborted().count(), 2);
    for report in &summary.instruments {
        assert!(report.aborted.as_deref().unwrap_or_default().contains("browser unavailable"));
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrent_pipelines_keep_their_own_sessions() -> Result<()> {
    init_tracing();
    let mut engine = ScriptedRenderEngine::new();
    let instruments = vec![
        Instrument::new("600036", "招商银行"),
        Instrument::new("000858", "五粮液"),
        Instrument::new("601318", "中国平安"),
    ];
    for (n, instrument) in instruments.iter().enumerate() {
        let rows = vec![
            post_row(&instrument.code, &format!("{n}1"), "2024-05-01"),
            post_row(&instrument.code, &format!("{n}2"), "2024-05-02"),
        ];
        engine = engine.on_page(listing_url(&instrument.code, 1), rows);
    }
    let store = Arc::new(MemoryStore::new());

    let mut settings = settings(instruments.clone(), comments_only());
    settings.stages.comments = false;
    settings.concurrent = true;
    let summary = orchestrator(settings, &engine, &store)?.run().await;

    for (report, instrument) in summary.instruments.iter().zip(&instruments) {
        assert_eq!(&report.instrument, instrument);
        assert_eq!(report.window, DateWindow::new(date("2024-05-01"), date("2024-05-02")));
        assert_eq!(store.count(&Scope::new(instrument.code.clone(), RecordKind::Post)).await, 2);
    }
    let log = engine.log();
    assert_eq!(log.opens, 3);
    assert_eq!(log.closes, 3);
    Ok(())
}

#[tokio::test]
async fn test_comment_prefix_limit() -> Result<()> {
    init_tracing();
    let code = "000858";
    let rows: Vec<String> = (1..=8).map(|d| post_row(code, &d.to_string(), &format!("2024-06-0{d}"))).collect();
    let mut engine = ScriptedRenderEngine::new().on_page(listing_url(code, 1), rows);
    for d in 1..=8 {
        engine = engine.on_page(comment_url(code, &d.to_string()), vec![comment_item("好")]);
    }
    let store = Arc::new(MemoryStore::new());

    let mut settings = settings(vec![Instrument::new(code, "五粮液")], comments_only());
    settings.pages = 1;
    settings.comment_post_limit = Some(5);
    let summary = orchestrator(settings, &engine, &store)?.run().await;

    let comments = summary.instruments[0].stage(Stage::Comments).unwrap();
    assert_eq!(comments.pages_attempted, 5);
    assert_eq!(store.count(&Scope::new(code, RecordKind::Comment)).await, 5);
    Ok(())
}

#[tokio::test]
async fn test_posts_without_site_id_count_as_dropped() -> Result<()> {
    init_tracing();
    let code = "600036";
    let engine = ScriptedRenderEngine::new().on_page(comment_url(code, "7"), vec![comment_item("看好")]);
    let store = Arc::new(MemoryStore::new());
    let scope = Scope::new(code, RecordKind::Post);
    for post_id in [Some("7"), None] {
        let post = Record::Post(Post {
            title: format!("帖子 {post_id:?}"),
            author: "someone".to_string(),
            post_date: date("2024-07-01"),
            post_time: "09:00".to_string(),
            reply_count: 1,
            like_count: 0,
            post_id: post_id.map(str::to_string),
        });
        store.insert(&scope, &post).await?;
    }
    let ctx = stage_context(code, &engine, &store)?;

    let report = comments::run(&ctx, DateWindow::new(date("2024-07-01"), date("2024-07-01"))).await?;

    assert_eq!(report.pages_attempted, 1);
    assert_eq!(report.records_saved, 1);
    assert_eq!(report.records_dropped, 1);
    assert_eq!(store.count(&Scope::new(code, RecordKind::Comment)).await, 1);
    Ok(())
}
