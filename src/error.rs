use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transfer of [{set}/{filename}] failed: {message}")]
    Transfer {
        set: String,
        filename: String,
        message: String,
    },

    #[error("Skipped [{filename}] over size limit ({size} bytes, max {limit})")]
    SizeLimitExceeded {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("Unsupported sync option: {0}")]
    UnsupportedMode(String),

    #[error("Custom set titles were not confirmed")]
    UserCancelled,

    #[error("Local provider error: {0}")]
    Local(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
