use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

fn invalid(path: impl Into<PathBuf>, reason: &str) -> SyncError {
    SyncError::InvalidPath {
        path: path.into(),
        reason: reason.to_string(),
    }
}

/// Validate the sync root and return its canonical form.
pub fn validate_sync_root(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(invalid(path, "sync root does not exist"));
    }
    if !path.is_dir() {
        return Err(invalid(path, "sync root is not a directory"));
    }
    Ok(path.canonicalize()?)
}

/// Set name of a local directory: its path relative to `root`, joined with '/'.
///
/// Returns `None` for the root itself and for directories outside it.
pub fn set_name_for(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Local directory for a set name, confined to `root`.
///
/// Set names use '/' as separator. With `cross_platform` a '\\' written by a
/// Windows client is treated as a separator as well.
pub fn set_directory(root: &Path, set: &str, cross_platform: bool) -> Result<PathBuf> {
    let is_separator = |c: char| c == '/' || (cross_platform && c == '\\');
    let mut dir = root.to_path_buf();
    let mut depth = 0;

    for part in set.split(is_separator).filter(|p| !p.is_empty()) {
        if part == "." || part == ".." || part.contains('\0') {
            return Err(invalid(set, "set name escapes the sync root"));
        }
        dir.push(part);
        depth += 1;
    }

    if depth == 0 {
        return Err(invalid(set, "empty set name"));
    }
    Ok(dir)
}

/// Path of `filename` inside a set directory. Filenames must be a single path component.
pub fn item_destination(dir: &Path, filename: &str) -> Result<PathBuf> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
    {
        return Err(invalid(dir.join(filename), "filename is not a plain file name"));
    }
    Ok(dir.join(filename))
}

/// Directory to rescan after `changed` was touched. Falls back to `root` for paths outside it.
pub fn scope_directory(root: &Path, changed: &Path) -> PathBuf {
    match changed.parent() {
        Some(parent) if parent.starts_with(root) => parent.to_path_buf(),
        _ => root.to_path_buf(),
    }
}

/// Filename as a Unix client would have stored it.
pub fn normalize_separators(name: &str) -> String {
    name.replace('\\', "/")
}
