//! Remote photo service abstraction
//!
//! The engine only talks to the service through [`RemoteClient`]. A set is an
//! album addressed by its name; items are addressed by filename within a set.

pub mod directory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::sync_engine::types::RemoteItems;

pub use directory::DirectoryRemote;

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// All remote sets, keyed by set name, valued by set id.
    async fn list_sets(&self) -> Result<BTreeMap<String, String>>;

    /// Items of `set` keyed by filename. With `include_ref` the values are
    /// download references, otherwise item ids.
    async fn list_items(&self, set: &str, include_ref: bool) -> Result<RemoteItems>;

    /// Title shown to the user for a set.
    fn display_title(&self, set: &str) -> String;

    /// Upload `local_path` as `filename` into `set`, creating the set when
    /// missing. `Ok(None)` means the service accepted the call but issued no id.
    async fn upload(&self, local_path: &Path, filename: &str, set: &str) -> Result<Option<String>>;

    /// Fetch `item_ref` into `destination`, creating missing directories.
    async fn download(&self, item_ref: &str, destination: &Path) -> Result<()>;
}
