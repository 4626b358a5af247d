use backoff::{backoff::Backoff, ExponentialBackoff};
use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, Response};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::identity::pick;
use crate::settings::{FetchConfig, RequestIdentity};
use crate::types::{CrawlerError, Result};

/// A successfully retrieved origin document.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub status: u16,
    pub bytes: Bytes,
}

impl Document {
    /// Body decoded with the charset sniffed from the bytes themselves.
    /// The `Content-Type` charset is ignored; origins often get it wrong.
    pub fn text(&self) -> String {
        decode_body(&self.bytes).0
    }
}

pub fn decode_body(bytes: &[u8]) -> (String, &'static Encoding) {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    let (text, used, _) = guessed.decode(bytes);
    (text.into_owned(), used)
}

/// Terminal outcome once every attempt has failed, or once the body turned
/// out to be over the size limit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{url}: gave up after {attempts} attempts ({last_error})")]
pub struct FetchFailure {
    pub url: String,
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub last_error: String,
    /// Retrying cannot help.
    pub too_large: bool,
}

/// Per-request overrides of the fetcher defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchLimits {
    pub timeout: Option<Duration>,
    pub max_bytes: Option<u64>,
}

enum BodyError {
    TooLarge(u64),
    Transport(reqwest::Error),
}

struct Route {
    client: Client,
    proxy: Option<String>,
}

/// Resilient document retrieval: random identity and proxy per attempt,
/// bounded retries with jittered pauses.
pub struct Fetcher {
    routes: Vec<Route>,
    identities: Vec<HeaderMap>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut routes = Vec::new();
        if config.proxies.is_empty() {
            routes.push(Route {
                client: Self::client_builder(&config).no_proxy().build()?,
                proxy: None,
            });
        }
        for proxy in &config.proxies {
            let client = Self::client_builder(&config)
                .proxy(reqwest::Proxy::all(proxy)?)
                .build()?;
            routes.push(Route {
                client,
                proxy: Some(proxy.clone()),
            });
        }

        let identities = config
            .identities
            .iter()
            .map(header_map)
            .collect::<Result<Vec<_>>>()?;
        if identities.is_empty() {
            return Err(CrawlerError::Config("identity pool is empty".to_string()));
        }

        Ok(Self {
            routes,
            identities,
            config,
        })
    }

    fn client_builder(config: &FetchConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .deflate(true)
            .brotli(true)
    }

    pub async fn get(&self, url: &str) -> std::result::Result<Document, FetchFailure> {
        self.fetch(url, Method::GET, FetchLimits::default()).await
    }

    /// GET under a custom timeout and body size cap.
    pub async fn fetch_limited(
        &self,
        url: &str,
        limits: FetchLimits,
    ) -> std::result::Result<Document, FetchFailure> {
        self.fetch(url, Method::GET, limits).await
    }

    /// Try up to `max_retries` times. Non-2xx statuses and transport errors
    /// are retried; the caller gets a [`FetchFailure`] value, never a panic.
    pub async fn fetch(
        &self,
        url: &str,
        method: Method,
        limits: FetchLimits,
    ) -> std::result::Result<Document, FetchFailure> {
        let attempts = self.config.max_retries.max(1);
        let mut backoff = self.retry_backoff();
        let mut last_status = None;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let (route, headers) = self.draw();
            debug!(url, attempt, proxy = ?route.proxy, "Fetching");

            let mut request = route.client.request(method.clone(), url).headers(headers.clone());
            if let Some(timeout) = limits.timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    match read_body(response, limits.max_bytes).await {
                        Ok(bytes) => {
                            debug!(url, attempt, bytes = bytes.len(), "Fetched");
                            return Ok(Document {
                                url: url.to_string(),
                                status,
                                bytes,
                            });
                        }
                        Err(BodyError::TooLarge(size)) => {
                            warn!(url, size, limit = ?limits.max_bytes, "Body over size limit, not retrying");
                            return Err(FetchFailure {
                                url: url.to_string(),
                                attempts: attempt,
                                last_status: Some(status),
                                last_error: format!("body of at least {size} bytes exceeds limit"),
                                too_large: true,
                            });
                        }
                        Err(BodyError::Transport(e)) => last_error = e.to_string(),
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    last_error = format!(
                        "HTTP {}: {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Unknown")
                    );
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < attempts {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_millis(self.config.retry_pause.max_ms));
                warn!(url, attempt, error = %last_error, "Fetch attempt failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }

        error!(url, attempts, error = %last_error, "Fetch failed");
        Err(FetchFailure {
            url: url.to_string(),
            attempts,
            last_status,
            last_error,
            too_large: false,
        })
    }

    fn draw(&self) -> (&Route, &HeaderMap) {
        let mut rng = rand::rng();
        // Both pools are non-empty by construction.
        let route = pick(&self.routes, &mut rng).unwrap_or(&self.routes[0]);
        let headers = pick(&self.identities, &mut rng).unwrap_or(&self.identities[0]);
        (route, headers)
    }

    // Uniform jitter over the configured pause range, constant centre.
    fn retry_backoff(&self) -> ExponentialBackoff {
        let bounds = self.config.retry_pause;
        let min = bounds.min_ms as f64;
        let max = bounds.max_ms.max(bounds.min_ms) as f64;
        let centre = (min + max) / 2.0;
        let spread = if centre > 0.0 { (max - min) / (max + min) } else { 0.0 };
        let interval = Duration::from_secs_f64(centre / 1_000.0);
        ExponentialBackoff {
            current_interval: interval,
            initial_interval: interval,
            randomization_factor: spread,
            multiplier: 1.0,
            max_interval: interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Read the body, refusing a declared or streamed length over `max_bytes`.
async fn read_body(mut response: Response, max_bytes: Option<u64>) -> std::result::Result<Bytes, BodyError> {
    let Some(limit) = max_bytes else {
        return response.bytes().await.map_err(BodyError::Transport);
    };
    if let Some(declared) = response.content_length() {
        if declared > limit {
            return Err(BodyError::TooLarge(declared));
        }
    }
    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(BodyError::Transport)? {
        let received = (body.len() + chunk.len()) as u64;
        if received > limit {
            return Err(BodyError::TooLarge(received));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

fn header_map(identity: &RequestIdentity) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let ua = HeaderValue::from_str(&identity.user_agent)
        .map_err(|e| CrawlerError::Config(format!("bad user agent: {e}")))?;
    headers.insert(USER_AGENT, ua);
    for (name, value) in &identity.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CrawlerError::Config(format!("bad header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CrawlerError::Config(format!("bad header value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
