pub mod engine;
pub mod types;

pub use engine::{ProgressObserver, SyncEngine};
pub use types::{
    Direction, LocalIndex, LocalMetadata, MediaItem, RemoteIndex, RemoteItems, SkipReason, SyncMode,
    SyncReport, TransferEvent, TransferFailure, TransferTask,
};
