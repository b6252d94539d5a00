//! Run configuration
//!
//! A [`SyncConfig`] is assembled once at startup from an optional YAML file
//! and command line overrides, validated, and then shared read-only with the
//! sync engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::input_validation::{
    validate_concurrency, validate_ignore_extensions, validate_path_argument,
};
use crate::sync_engine::types::{extension_of, EXT_IMAGE, EXT_VIDEO};

pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Local directory whose subdirectories map to remote sets.
    pub sync_root: PathBuf,
    /// Root of the directory-backed album store.
    pub remote_root: Option<PathBuf>,
    pub ignore_images: bool,
    pub ignore_videos: bool,
    /// Extensions removed from scanning and never transferred.
    pub ignore_extensions: Vec<String>,
    pub custom_set_titles: bool,
    /// Ask for confirmation after listing custom set titles.
    pub custom_set_debug: bool,
    /// Treat '\\' and '/' as equivalent when comparing names across platforms.
    pub cross_platform_paths: bool,
    pub max_concurrent_transfers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_root: PathBuf::from("."),
            remote_root: None,
            ignore_images: false,
            ignore_videos: false,
            ignore_extensions: Vec::new(),
            custom_set_titles: false,
            custom_set_debug: false,
            cross_platform_paths: cfg!(windows),
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
        }
    }
}

impl SyncConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Lower-case the ignore list, drop leading dots, blanks and duplicates.
    pub fn normalize(mut self) -> Self {
        let mut seen = BTreeSet::new();
        self.ignore_extensions = self
            .ignore_extensions
            .into_iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && seen.insert(ext.clone()))
            .collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_path_argument(&self.sync_root.to_string_lossy())?;
        if let Some(remote_root) = &self.remote_root {
            validate_path_argument(&remote_root.to_string_lossy())?;
        }
        validate_ignore_extensions(&self.ignore_extensions)?;
        validate_concurrency(self.max_concurrent_transfers)?;
        Ok(())
    }

    pub fn extension_filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(
            &self.ignore_extensions,
            self.ignore_images,
            self.ignore_videos,
        )
    }
}

/// Scan and ignore rules derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    media: BTreeSet<String>,
    ignored: BTreeSet<String>,
}

impl ExtensionFilter {
    pub fn new(ignore_extensions: &[String], ignore_images: bool, ignore_videos: bool) -> Self {
        let mut ignored: BTreeSet<String> = ignore_extensions.iter().cloned().collect();
        if ignore_images {
            ignored.extend(EXT_IMAGE.iter().map(|e| e.to_string()));
        }
        if ignore_videos {
            ignored.extend(EXT_VIDEO.iter().map(|e| e.to_string()));
        }

        let media = EXT_IMAGE
            .iter()
            .chain(EXT_VIDEO)
            .filter(|e| !ignore_extensions.iter().any(|i| i.as_str() == **e))
            .map(|e| e.to_string())
            .collect();

        Self { media, ignored }
    }

    /// Whether the scanner should pick up `filename`. Case-insensitive.
    pub fn is_media(&self, filename: &str) -> bool {
        extension_of(filename).is_some_and(|ext| self.media.contains(&ext))
    }

    /// Whether `filename` must never be transferred. Names without an extension never are.
    pub fn is_ignored(&self, filename: &str) -> bool {
        extension_of(filename).is_some_and(|ext| self.ignored.contains(&ext))
    }

    pub fn media_extensions(&self) -> impl Iterator<Item = &str> {
        self.media.iter().map(String::as_str)
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(&[], false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_transfers, DEFAULT_MAX_CONCURRENT_TRANSFERS);
    }

    #[test]
    fn test_yaml_config_partial_fields() {
        let config = SyncConfig::from_yaml_str(
            "sync_root: /srv/photos\nignore_videos: true\nignore_extensions: [\".MOV\", gif]\n",
        )
        .unwrap()
        .normalize();

        assert_eq!(config.sync_root, PathBuf::from("/srv/photos"));
        assert!(config.ignore_videos);
        assert!(!config.ignore_images);
        assert_eq!(config.ignore_extensions, vec!["mov", "gif"]);
        assert_eq!(config.max_concurrent_transfers, DEFAULT_MAX_CONCURRENT_TRANSFERS);
    }

    #[test]
    fn test_yaml_config_rejects_unknown_types() {
        assert!(SyncConfig::from_yaml_str("max_concurrent_transfers: many").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_jobs() {
        let config = SyncConfig {
            max_concurrent_transfers: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_ignore_extensions() {
        let filter = ExtensionFilter::new(&["avi".to_string()], false, false);
        assert!(filter.is_media("a.JPG"));
        assert!(!filter.is_media("a.avi"));
        assert!(!filter.is_media("notes.txt"));
        assert!(filter.is_ignored("clip.AVI"));
        assert!(!filter.is_ignored("a.jpg"));
        assert!(!filter.is_ignored("README"));
    }

    #[test]
    fn test_filter_ignore_images_and_videos() {
        let images_off = ExtensionFilter::new(&[], true, false);
        assert!(images_off.is_ignored("a.png"));
        assert!(!images_off.is_ignored("a.mp4"));
        // Ignored kinds are still scanned; they are filtered when transfers are planned.
        assert!(images_off.is_media("a.png"));

        let videos_off = ExtensionFilter::new(&[], false, true);
        assert!(videos_off.is_ignored("a.mts"));
        assert!(!videos_off.is_ignored("a.jpeg"));
    }
}
