pub mod cancel;
pub mod config;
pub mod error;
pub mod input_validation;
pub mod local;
pub mod logging;
pub mod path_validation;
pub mod remote;
pub mod sync_engine;
pub mod transfer;
pub mod watcher;

#[cfg(test)]
mod lib_tests;

pub use cancel::{CancellationController, RunState};
pub use config::{ExtensionFilter, SyncConfig};
pub use error::{Result, SyncError};
pub use local::{FsLocalProvider, LocalProvider};
pub use remote::{DirectoryRemote, RemoteClient};
pub use sync_engine::{SyncEngine, SyncReport};

/// Version of the crate, as reported by `photosync --version`.
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
