use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::ArtifactStore;
use crate::utils::text::sanitize_file_name;

/// Deterministic location of a report document: `<root>/<code>/<title>.<ext>`.
pub fn artifact_path(root: &Path, instrument_code: &str, title: &str, extension: &str) -> PathBuf {
    root.join(instrument_code)
        .join(format!("{}.{}", sanitize_file_name(title), extension))
}

/// Local filesystem artifact store. Writes go to a sibling `.part` file
/// first and are renamed into place, so a crash never leaves a truncated
/// document at the final path.
#[derive(Debug, Clone, Default)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        if let Err(e) = tokio::fs::rename(&partial, path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e).with_context(|| format!("Failed to move artifact into {}", path.display()));
        }

        debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic() {
        let root = Path::new("data/reports");
        let a = artifact_path(root, "600036", "招商银行: 年报点评", "pdf");
        let b = artifact_path(root, "600036", "招商银行: 年报点评", "pdf");
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("data/reports/600036/招商银行_ 年报点评.pdf"));
    }

    #[tokio::test]
    async fn writes_create_directories_and_leave_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact_path(dir.path(), "000858", "report", "pdf");
        let store = FsArtifactStore::new();

        assert!(!store.exists(&path).await.unwrap());
        store.write(&path, b"%PDF-1.4").await.unwrap();
        assert!(store.exists(&path).await.unwrap());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"%PDF-1.4");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
