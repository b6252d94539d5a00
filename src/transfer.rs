//! Bounded pool of concurrent transfers
//!
//! Transfers run as tokio tasks; at most `max_concurrent` of them perform I/O
//! at once. [`TransferPool::drain`] is the barrier between phases: it waits
//! for every task spawned so far and hands the outcomes back to the caller,
//! which folds them into its indices on its own task.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::error::{Result, SyncError};
use crate::sync_engine::types::TransferTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

#[derive(Debug)]
pub struct TransferOutcome {
    pub id: TransferId,
    pub task: TransferTask,
    /// New remote id for uploads, `None` for downloads.
    pub result: Result<Option<String>>,
}

pub struct TransferPool {
    tasks: JoinSet<TransferOutcome>,
    permits: Arc<Semaphore>,
    next_id: u64,
}

impl TransferPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_id: 0,
        }
    }

    /// Queue `operation` for `task`. Never blocks; the operation starts once a permit is free.
    pub fn spawn<F>(&mut self, task: TransferTask, operation: F) -> TransferId
    where
        F: Future<Output = Result<Option<String>>> + Send + 'static,
    {
        let id = TransferId(self.next_id);
        self.next_id += 1;

        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Transfer {
                    set: task.set.clone(),
                    filename: task.filename.clone(),
                    message: "transfer task panicked".to_string(),
                }),
            };
            TransferOutcome { id, task, result }
        });

        id
    }

    /// Number of transfers spawned over the pool's lifetime.
    pub fn spawned(&self) -> u64 {
        self.next_id
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every spawned transfer to finish and return their outcomes.
    pub async fn drain(&mut self) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Transfer task was lost: {e}"),
            }
        }
        outcomes.sort_by_key(|o| o.id);
        outcomes
    }
}
