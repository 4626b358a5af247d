use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

use sentiment_crawler::{
    ChromeEngine, Collaborators, CrawlSettings, Fetcher, FsArtifactStore, Instrument, MemoryStore,
    Orchestrator, PgStore, RecordStore,
};

/// Collect discussion posts, comments, research reports and news for a set
/// of stock instruments.
#[derive(Parser)]
#[command(name = "sentiment-crawler")]
#[command(version)]
struct Cli {
    /// JSON settings file; every field is optional
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instrument as CODE:NAME, repeatable. Replaces the configured list.
    #[arg(long = "instrument", value_parser = parse_instrument)]
    instruments: Vec<Instrument>,

    /// Pages per stage (1-10)
    #[arg(long)]
    pages: Option<u32>,

    /// Run all instruments at once
    #[arg(long)]
    concurrent: bool,

    /// Enable the comment lookup stage
    #[arg(long)]
    comments: bool,

    #[arg(long)]
    no_reports: bool,

    #[arg(long)]
    no_news: bool,

    /// Where report documents are written
    #[arg(long)]
    artifact_root: Option<PathBuf>,

    /// Postgres connection string. Without it records are kept in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_instrument(value: &str) -> std::result::Result<Instrument, String> {
    let (code, name) = value
        .split_once(':')
        .ok_or_else(|| format!("expected CODE:NAME, got {value:?}"))?;
    if code.trim().is_empty() || name.trim().is_empty() {
        return Err(format!("expected CODE:NAME, got {value:?}"));
    }
    Ok(Instrument::new(code.trim(), name.trim()))
}

impl Cli {
    fn settings(&self) -> Result<CrawlSettings> {
        let mut settings = match &self.config {
            Some(path) => CrawlSettings::load(path)?,
            None => CrawlSettings::default(),
        };
        if !self.instruments.is_empty() {
            settings.instruments = self.instruments.clone();
        }
        if let Some(pages) = self.pages {
            settings.pages = pages;
        }
        if let Some(root) = &self.artifact_root {
            settings.artifact_root = root.clone();
        }
        settings.concurrent |= self.concurrent;
        settings.stages.comments |= self.comments;
        settings.stages.reports &= !self.no_reports;
        settings.stages.news &= !self.no_news;
        if self.headed {
            settings.render.headless = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let settings = cli.settings().context("Invalid settings")?;
    info!(
        instruments = settings.instruments.len(),
        pages = settings.pages,
        concurrent = settings.concurrent,
        "Starting sentiment crawler"
    );

    let store: Arc<dyn RecordStore> = match &cli.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await.map_err(|e| {
                error!("Failed to connect to database. Make sure PostgreSQL is running.");
                e
            })?;
            store.setup_schema().await?;
            info!("Using PostgreSQL record store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, records are kept in memory for this run only");
            Arc::new(MemoryStore::new())
        }
    };

    let collaborators = Collaborators {
        store,
        artifacts: Arc::new(FsArtifactStore::new()),
        engine: Arc::new(ChromeEngine::new(&settings.render)),
        fetcher: Arc::new(Fetcher::new(settings.fetch.clone())?),
    };

    let summary = Orchestrator::new(settings, collaborators).run().await;

    for report in &summary.instruments {
        match &report.aborted {
            Some(reason) => warn!(instrument = %report.instrument, %reason, "Aborted"),
            None => {
                for stage in &report.stages {
                    info!(
                        instrument = %report.instrument,
                        stage = %stage.stage,
                        pages = stage.pages_succeeded,
                        skipped = stage.pages_skipped,
                        saved = stage.records_saved,
                        failed = stage.persist_failures,
                        "Stage summary"
                    );
                }
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
