//! Album store backed by a plain directory tree.
//!
//! Each directory under the store root that holds files is an album named by
//! its relative path. Item ids are stable hashes of `set/filename`; download
//! references are absolute paths inside the store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use twox_hash::XxHash64;
use walkdir::WalkDir;

use super::RemoteClient;
use crate::error::{Result, SyncError};
use crate::path_validation::{item_destination, set_directory, set_name_for};
use crate::sync_engine::types::RemoteItems;

pub struct DirectoryRemote {
    root: PathBuf,
    custom_titles: bool,
}

impl DirectoryRemote {
    /// Open the store at `root`, creating the directory when missing.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
            custom_titles: false,
        })
    }

    /// Show only the last path component of a set as its title.
    pub fn with_custom_titles(mut self, enabled: bool) -> Self {
        self.custom_titles = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hash_id(key: &str) -> String {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key.as_bytes());
        format!("{:016x}", hasher.finish())
    }

    fn item_id(set: &str, filename: &str) -> String {
        Self::hash_id(&format!("{set}/{filename}"))
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Copy through a hidden temporary file so an interrupted copy never leaves a
/// truncated item under its final name.
async fn copy_atomically(source: &Path, destination: &Path) -> Result<()> {
    let parent = destination
        .parent()
        .ok_or_else(|| SyncError::Remote(format!("no parent for {}", destination.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = parent.join(format!(".{name}.part"));

    if let Err(e) = tokio::fs::copy(source, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&partial, destination).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl RemoteClient for DirectoryRemote {
    async fn list_sets(&self) -> Result<BTreeMap<String, String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut sets = BTreeMap::new();
            let walker = WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                .filter_entry(|e| !is_hidden(&e.file_name().to_string_lossy()));

            for entry in walker {
                let entry = entry.map_err(|e| SyncError::Remote(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(set) = entry.path().parent().and_then(|dir| set_name_for(&root, dir)) {
                    let id = DirectoryRemote::hash_id(&set);
                    sets.entry(set).or_insert(id);
                }
            }
            Ok(sets)
        })
        .await
        .map_err(|e| SyncError::Remote(format!("listing task failed: {e}")))?
    }

    async fn list_items(&self, set: &str, include_ref: bool) -> Result<RemoteItems> {
        let dir = set_directory(&self.root, set, false)?;
        let mut items = RemoteItems::new();
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(items);
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&filename) {
                continue;
            }
            let value = if include_ref {
                entry.path().to_string_lossy().into_owned()
            } else {
                Self::item_id(set, &filename)
            };
            items.insert(filename, value);
        }
        Ok(items)
    }

    fn display_title(&self, set: &str) -> String {
        if self.custom_titles {
            set.rsplit('/').next().unwrap_or(set).to_string()
        } else {
            set.to_string()
        }
    }

    async fn upload(&self, local_path: &Path, filename: &str, set: &str) -> Result<Option<String>> {
        let destination = item_destination(&set_directory(&self.root, set, false)?, filename)?;
        copy_atomically(local_path, &destination).await?;
        debug!("Stored {} as {}", local_path.display(), destination.display());
        Ok(Some(Self::item_id(set, filename)))
    }

    async fn download(&self, item_ref: &str, destination: &Path) -> Result<()> {
        let source = PathBuf::from(item_ref);
        let escapes = source
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if escapes || !source.starts_with(&self.root) {
            return Err(SyncError::Remote(format!(
                "reference {item_ref} is outside the album store"
            )));
        }
        copy_atomically(&source, destination).await
    }
}
