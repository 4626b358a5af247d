//! Run configuration. Loaded from an optional JSON file, then validated.
//! Every field has a default so a partial file is enough.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{CrawlerError, Instrument, Result};

/// Upper bound on pages per stage.
pub const MAX_PAGES: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub instruments: Vec<Instrument>,
    pub pages: u32,
    pub stages: StageToggles,
    pub concurrent: bool,
    pub instrument_pause_ms: u64,
    /// Only the first N posts of the date window get their comments crawled.
    pub comment_post_limit: Option<usize>,
    pub artifact_root: PathBuf,
    pub urls: UrlTemplates,
    pub render: RenderConfig,
    pub fetch: FetchConfig,
    pub download: DownloadConfig,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            instruments: vec![
                Instrument::new("600036", "招商银行"),
                Instrument::new("000858", "五粮液"),
            ],
            pages: 2,
            stages: StageToggles::default(),
            concurrent: false,
            instrument_pause_ms: 2_000,
            comment_post_limit: Some(5),
            artifact_root: PathBuf::from("data/reports"),
            urls: UrlTemplates::default(),
            render: RenderConfig::default(),
            fetch: FetchConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl CrawlSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let settings: CrawlSettings = serde_json::from_str(&contents).map_err(|e| {
            CrawlerError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(settings)
    }

    /// Check cross-field constraints. Out-of-range page counts are clamped
    /// rather than rejected.
    pub fn validate(&mut self) -> Result<()> {
        let mut problems = Vec::new();

        if self.instruments.is_empty() {
            problems.push("no instruments configured".to_string());
        }
        if self.pages == 0 || self.pages > MAX_PAGES {
            let clamped = self.pages.clamp(1, MAX_PAGES);
            tracing::warn!(requested = self.pages, clamped, "Page count out of range, clamping");
            self.pages = clamped;
        }
        if self.fetch.max_retries == 0 {
            problems.push("fetch.max_retries must be at least 1".to_string());
        }
        if self.download.max_attempts == 0 {
            problems.push("download.max_attempts must be at least 1".to_string());
        }
        if self.download.max_bytes == 0 {
            problems.push("download.max_bytes must be positive".to_string());
        }
        for (name, bounds) in [
            ("fetch.retry_pause", &self.fetch.retry_pause),
            ("render.page_pause", &self.render.page_pause),
        ] {
            if bounds.min_ms > bounds.max_ms {
                problems.push(format!("{name}: min_ms exceeds max_ms"));
            }
        }
        if self.fetch.identities.is_empty() {
            problems.push("fetch.identities must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CrawlerError::Config(problems.join("; ")))
        }
    }
}

/// Per-stage switches. Post discovery always runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub comments: bool,
    pub reports: bool,
    pub news: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            comments: false,
            reports: true,
            news: true,
        }
    }
}

/// URL templates per origin. Placeholders: `{code}`, `{name}`, `{page}`, `{post_id}`.
/// An empty template disables the stage that uses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlTemplates {
    pub listing: String,
    pub comment: String,
    pub report_search: String,
    pub news: String,
}

impl Default for UrlTemplates {
    fn default() -> Self {
        Self {
            listing: "https://guba.eastmoney.com/list,{code}.html?page={page}".to_string(),
            comment: "https://guba.eastmoney.com/news,{code},{post_id}.html".to_string(),
            report_search: "http://so.eastmoney.com/Yanbao/s?keyword={name}&pageindex={page}"
                .to_string(),
            news: "http://so.eastmoney.com/News/s?keyword={name}&pageindex={page}".to_string(),
        }
    }
}

/// Uniform random pause range, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseBounds {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PauseBounds {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms))
    }

    pub async fn sleep(&self) {
        let pause = self.sample(&mut rand::rng());
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub ready_timeout_ms: u64,
    /// Pause between consecutive page loads of one session.
    pub page_pause: PauseBounds,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 10_000,
            page_pause: PauseBounds::new(1_000, 2_000),
            headless: true,
            chrome_executable: None,
        }
    }
}

impl RenderConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// A header set presented to origins. `user_agent` is always sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub user_agent: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RequestIdentity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_pause: PauseBounds,
    pub identities: Vec<RequestIdentity>,
    /// Proxy URLs. Empty means direct connections.
    pub proxies: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            retry_pause: PauseBounds::new(1_000, 3_000),
            identities: crate::identity::default_identities(),
            proxies: Vec::new(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry policy and limits for report artifact downloads, layered over the
/// fetcher's own retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_attempts: u32,
    pub pause_ms: u64,
    /// Per-request timeout, replacing the page fetch timeout.
    pub timeout_ms: u64,
    /// Documents larger than this are rejected, declared or streamed.
    pub max_bytes: u64,
    /// Link suffixes treated as downloadable documents, without the dot.
    pub extensions: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pause_ms: 2_000,
            timeout_ms: 30_000,
            max_bytes: 10 * 1024 * 1024,
            extensions: vec!["pdf".to_string()],
        }
    }
}

impl DownloadConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Instrument codes are six ASCII digits.
pub fn check_instrument(instrument: &Instrument) -> std::result::Result<(), String> {
    let code = instrument.code.as_str();
    if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(format!("instrument code must be six digits, got {code:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings: CrawlSettings = serde_json::from_str(
            r#"{ "pages": 3, "stages": { "comments": true }, "comment_post_limit": null }"#,
        )
        .unwrap();
        assert_eq!(settings.pages, 3);
        assert!(settings.stages.comments);
        assert!(settings.stages.reports);
        assert_eq!(settings.comment_post_limit, None);
        assert_eq!(settings.fetch.max_retries, 3);
        assert_eq!(settings.download.max_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.download.timeout(), Duration::from_secs(30));
        assert_eq!(settings.instruments.len(), 2);
    }

    #[test]
    fn validate_clamps_pages_and_reports_problems() {
        let mut settings = CrawlSettings {
            pages: 50,
            ..CrawlSettings::default()
        };
        settings.validate().unwrap();
        assert_eq!(settings.pages, MAX_PAGES);

        settings.instruments.clear();
        settings.fetch.retry_pause = PauseBounds::new(5, 1);
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("no instruments"));
        assert!(err.contains("fetch.retry_pause"));
    }

    #[test]
    fn pause_sample_stays_in_bounds() {
        let bounds = PauseBounds::new(1_000, 3_000);
        let mut rng = rand::rng();
        for _ in 0..100 {
            let pause = bounds.sample(&mut rng);
            assert!(pause >= Duration::from_secs(1) && pause <= Duration::from_secs(3));
        }
        assert_eq!(PauseBounds::none().sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn instrument_codes_are_six_digits() {
        assert!(check_instrument(&Instrument::new("600036", "招商银行")).is_ok());
        assert!(check_instrument(&Instrument::new("60003", "short")).is_err());
        assert!(check_instrument(&Instrument::new("60003A", "alpha")).is_err());
    }
}
