use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SyncError;

/// Image extensions recognised by the scanner (lower-case, no dot).
pub const EXT_IMAGE: &[&str] = &["jpg", "png", "jpeg", "gif", "bmp"];

/// Video extensions recognised by the scanner (lower-case, no dot).
pub const EXT_VIDEO: &[&str] = &["avi", "wmv", "mov", "mp4", "3gp", "ogg", "ogv", "mts"];

/// Largest file the remote service accepts. Uploads at or above this size are skipped.
pub const MAX_UPLOAD_BYTES: u64 = 1_073_741_824;

/// Download target that selects every remote set.
pub const DOWNLOAD_ALL: &str = ".";

/// Filenames returned by the remote service, mapped to an item id or a download reference.
pub type RemoteItems = HashMap<String, String>;

/// Remote membership per set name. Mutated as uploads succeed.
pub type RemoteIndex = BTreeMap<String, RemoteItems>;

/// Local membership per set name, entries ordered by filename.
pub type LocalIndex = BTreeMap<String, Vec<MediaItem>>;

/// Lower-cased text after the last '.', or `None` when the name has no dot.
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMetadata {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub filename: String,
    pub metadata: LocalMetadata,
}

impl MediaItem {
    pub fn new(filename: impl Into<String>, metadata: LocalMetadata) -> Self {
        Self {
            filename: filename.into(),
            metadata,
        }
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// One scheduled transfer. Its completion updates exactly one index entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferTask {
    pub direction: Direction,
    pub set: String,
    pub filename: String,
    /// Local path for uploads, remote item reference for downloads.
    pub source: String,
    /// Remote set name for uploads, local path for downloads.
    pub destination: String,
}

/// Validated argument of `sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    All,
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SyncMode::All),
            other => Err(SyncError::UnsupportedMode(other.to_string())),
        }
    }
}

/// Why an item was left alone instead of being transferred.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyPresent,
    Ignored,
    /// Not a recognised photo or video extension.
    NotMedia,
    Oversized,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyPresent => f.write_str("already present"),
            SkipReason::Ignored => f.write_str("ignored extension"),
            SkipReason::NotMedia => f.write_str("not a media file"),
            SkipReason::Oversized => f.write_str("over size limit"),
        }
    }
}

/// Progress notifications emitted while a run schedules and folds transfers.
#[derive(Debug, Clone, Copy)]
pub enum TransferEvent<'a> {
    Scheduled(&'a TransferTask),
    Completed(&'a TransferTask),
    Failed(&'a TransferTask, &'a str),
    Skipped {
        direction: Direction,
        set: &'a str,
        filename: &'a str,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferFailure {
    pub direction: Direction,
    pub set: String,
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OversizedItem {
    pub set: String,
    pub path: PathBuf,
    pub size: u64,
    pub message: String,
}

/// Outcome of one upload, download or sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub uploaded: u64,
    pub downloaded: u64,
    /// Items skipped because they already exist on the other side.
    pub already_present: u64,
    /// Items skipped by the extension ignore list.
    pub ignored: u64,
    pub oversized: Vec<OversizedItem>,
    pub failures: Vec<TransferFailure>,
    /// Set when an interrupt stopped scheduling before the run finished.
    pub interrupted: bool,
    /// Local membership as known at the end of the run.
    pub local: LocalIndex,
    /// Remote membership as known at the end of the run.
    pub remote: RemoteIndex,
}

impl SyncReport {
    pub fn transferred(&self) -> u64 {
        self.uploaded + self.downloaded
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.oversized.is_empty() && !self.interrupted
    }
}
