//! In-memory collaborators for exercising pipelines without a browser or
//! a filesystem.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::types::{ArtifactStore, RawElement, Readiness, RenderEngine, RenderSession, SessionIdentity};

#[derive(Debug, Clone)]
enum ScriptedPage {
    Ready(Vec<String>),
    TimedOut,
    Panic(String),
}

/// Every operation the scripted engine has seen, across all its sessions.
#[derive(Debug, Clone, Default)]
pub struct RenderLog {
    pub opens: usize,
    pub navigations: Vec<String>,
    pub extracts: usize,
    pub closes: usize,
}

impl RenderLog {
    pub fn operations(&self) -> usize {
        self.opens + self.navigations.len() + self.extracts + self.closes
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Render engine serving canned pages keyed by URL. Unknown URLs never
/// become ready.
///
/// ```ignore
/// let engine = ScriptedRenderEngine::new()
///     .on_page("https://origin/list?page=1", vec!["<tr>...</tr>"])
///     .on_timeout("https://origin/list?page=2");
/// ```
#[derive(Clone, Default)]
pub struct ScriptedRenderEngine {
    pages: Arc<HashMap<String, ScriptedPage>>,
    fail_open: bool,
    log: Arc<Mutex<RenderLog>>,
}

impl ScriptedRenderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page<S: Into<String>>(self, url: impl Into<String>, elements: Vec<S>) -> Self {
        let elements = elements.into_iter().map(Into::into).collect();
        self.script(url.into(), ScriptedPage::Ready(elements))
    }

    pub fn on_timeout(self, url: impl Into<String>) -> Self {
        self.script(url.into(), ScriptedPage::TimedOut)
    }

    /// Extraction on `url` panics with `message`.
    pub fn on_panic(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.script(url.into(), ScriptedPage::Panic(message.into()))
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    fn script(mut self, url: String, page: ScriptedPage) -> Self {
        Arc::make_mut(&mut self.pages).insert(url, page);
        self
    }

    pub fn log(&self) -> RenderLog {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl RenderEngine for ScriptedRenderEngine {
    async fn open(&self, _identity: &SessionIdentity) -> Result<Box<dyn RenderSession>> {
        if self.fail_open {
            bail!("browser unavailable");
        }
        lock(&self.log).opens += 1;
        Ok(Box::new(ScriptedSession {
            pages: Arc::clone(&self.pages),
            log: Arc::clone(&self.log),
            current: None,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSession {
    pages: Arc<HashMap<String, ScriptedPage>>,
    log: Arc<Mutex<RenderLog>>,
    current: Option<String>,
}

impl ScriptedSession {
    fn current_page(&self) -> Option<&ScriptedPage> {
        self.current.as_ref().and_then(|url| self.pages.get(url))
    }
}

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        lock(&self.log).navigations.push(url.to_string());
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn await_ready(&mut self, _selector: &str, _timeout: Duration) -> Result<Readiness> {
        Ok(match self.current_page() {
            Some(ScriptedPage::Ready(elements)) if !elements.is_empty() => Readiness::Ready,
            Some(ScriptedPage::Panic(_)) => Readiness::Ready,
            _ => Readiness::TimedOut,
        })
    }

    async fn extract_all(&mut self, _selector: &str) -> Result<Vec<RawElement>> {
        lock(&self.log).extracts += 1;
        match self.current_page() {
            Some(ScriptedPage::Ready(elements)) => {
                Ok(elements.iter().map(RawElement::new).collect())
            }
            Some(ScriptedPage::Panic(message)) => panic!("{message}"),
            _ => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.log).closes += 1;
        Ok(())
    }
}

/// Artifact store backed by a map, counting writes.
#[derive(Clone, Default)]
pub struct MemoryArtifactStore {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        lock(&self.files).keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(lock(&self.files).contains_key(path))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        lock(&self.files).insert(path.to_path_buf(), bytes.to_vec());
        *lock(&self.writes) += 1;
        Ok(())
    }
}
