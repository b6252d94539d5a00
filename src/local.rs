//! Local filesystem provider
//!
//! Builds the [`LocalIndex`] for a run by walking the sync root. Every
//! directory below the root that holds media files becomes a set named by its
//! relative path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ExtensionFilter;
use crate::error::{Result, SyncError};
use crate::path_validation::set_name_for;
use crate::sync_engine::types::{LocalIndex, LocalMetadata, MediaItem};

#[async_trait]
pub trait LocalProvider: Send + Sync {
    /// Scan `scope` (a directory inside `root`) and return its sets keyed by set name.
    async fn scan(&self, root: &Path, scope: &Path, filter: &ExtensionFilter) -> Result<LocalIndex>;

    async fn stat(&self, path: &Path) -> Result<LocalMetadata>;

    async fn exists(&self, path: &Path) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct FsLocalProvider;

impl FsLocalProvider {
    pub fn new() -> Self {
        Self
    }
}

fn metadata_of(meta: &std::fs::Metadata) -> LocalMetadata {
    LocalMetadata {
        size: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

fn scan_blocking(root: PathBuf, scope: PathBuf, filter: ExtensionFilter) -> Result<LocalIndex> {
    let mut index = LocalIndex::new();

    let walker = WalkDir::new(&scope)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|e| SyncError::Local(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let filename = entry.file_name().to_string_lossy().into_owned();
        if !filter.is_media(&filename) {
            continue;
        }

        let Some(set) = entry.path().parent().and_then(|dir| set_name_for(&root, dir)) else {
            debug!("Skipped [{}] outside any set", entry.path().display());
            continue;
        };

        let meta = entry.metadata().map_err(|e| SyncError::Local(e.to_string()))?;
        index
            .entry(set)
            .or_default()
            .push(MediaItem::new(filename, metadata_of(&meta)));
    }

    for items in index.values_mut() {
        items.sort_by(|a, b| a.filename.cmp(&b.filename));
    }

    Ok(index)
}

#[async_trait]
impl LocalProvider for FsLocalProvider {
    async fn scan(&self, root: &Path, scope: &Path, filter: &ExtensionFilter) -> Result<LocalIndex> {
        debug!(
            "Scanning {} for [{}]",
            scope.display(),
            filter.media_extensions().collect::<Vec<_>>().join(",")
        );

        let root = root.to_path_buf();
        let scope = scope.to_path_buf();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || scan_blocking(root, scope, filter))
            .await
            .map_err(|e| SyncError::Local(format!("scan task failed: {e}")))?
    }

    async fn stat(&self, path: &Path) -> Result<LocalMetadata> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(metadata_of(&meta))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}
