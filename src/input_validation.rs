//! Validation of user supplied options
//!
//! Checks extension lists, path arguments and concurrency limits before they
//! are folded into the immutable run configuration.

use crate::error::{Result, SyncError};

const MAX_IGNORED_EXTENSIONS: usize = 100;
const MAX_EXTENSION_LENGTH: usize = 16;
const MAX_PATH_LENGTH: usize = 4096;
const MAX_CONCURRENT_TRANSFERS: usize = 64;

/// Split a comma separated `--ignore-ext` value into normalised extensions.
///
/// Entries are trimmed, stripped of a leading dot and lower-cased; blanks are dropped.
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Validate normalised ignore extensions.
pub fn validate_ignore_extensions(extensions: &[String]) -> Result<()> {
    if extensions.len() > MAX_IGNORED_EXTENSIONS {
        return Err(SyncError::Config(format!(
            "Too many ignored extensions: {} (max: {})",
            extensions.len(),
            MAX_IGNORED_EXTENSIONS
        )));
    }

    for ext in extensions {
        if ext.is_empty() {
            return Err(SyncError::Config("Empty extension in ignore list".to_string()));
        }

        if ext.len() > MAX_EXTENSION_LENGTH {
            return Err(SyncError::Config(format!(
                "Extension too long: '{}' ({} chars, max: {})",
                ext,
                ext.len(),
                MAX_EXTENSION_LENGTH
            )));
        }

        if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SyncError::Config(format!(
                "Extension contains invalid characters: '{ext}'"
            )));
        }
    }

    Ok(())
}

/// Validate a path argument coming from the command line or config file.
pub fn validate_path_argument(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SyncError::Config("Path cannot be empty".to_string()));
    }

    if path.len() > MAX_PATH_LENGTH {
        return Err(SyncError::Config(format!(
            "Path too long: {} bytes (max: {MAX_PATH_LENGTH})",
            path.len()
        )));
    }

    if path.contains('\0') {
        return Err(SyncError::Config("Path contains null byte".to_string()));
    }

    Ok(())
}

pub fn validate_concurrency(jobs: usize) -> Result<()> {
    if jobs == 0 || jobs > MAX_CONCURRENT_TRANSFERS {
        return Err(SyncError::Config(format!(
            "Concurrent transfers must be between 1 and {MAX_CONCURRENT_TRANSFERS}, got {jobs}"
        )));
    }
    Ok(())
}
