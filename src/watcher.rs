//! Filesystem watching for monitor mode
//!
//! Watches the sync root recursively, debounces bursts of events and hands
//! the changed paths to the engine so newly added media gets uploaded.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::path_validation::scope_directory;
use crate::sync_engine::SyncEngine;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Bounded buffer between the notify callback and the debounce thread.
const EVENT_BUFFER: usize = 100;

pub struct ChangeWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    cancellation_token: CancellationToken,
    debounce_thread: Option<thread::JoinHandle<()>>,
}

impl ChangeWatcher {
    /// Start watching `root`. `on_change` receives each debounced batch of changed paths.
    pub fn start<F>(root: PathBuf, debounce: Duration, on_change: F) -> Result<Self>
    where
        F: Fn(Vec<PathBuf>) + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        let (tx, rx) = sync_channel::<Event>(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) && tx.try_send(event).is_err()
            {
                debug!("Change buffer full, dropping event");
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let debounce_thread = thread::spawn(move || {
            let mut paths = HashSet::new();
            loop {
                if token.is_cancelled() {
                    return;
                }

                let first = match rx.recv_timeout(debounce) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                };
                paths.extend(first.paths);

                // Keep collecting until the tree has been quiet for `debounce`.
                loop {
                    if token.is_cancelled() {
                        return;
                    }
                    match rx.recv_timeout(debounce) {
                        Ok(event) => paths.extend(event.paths),
                        Err(RecvTimeoutError::Timeout) => {
                            if !paths.is_empty() {
                                let mut batch: Vec<PathBuf> = paths.drain().collect();
                                batch.sort();
                                on_change(batch);
                            }
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
        });

        Ok(Self {
            root,
            _watcher: watcher,
            cancellation_token,
            debounce_thread: Some(debounce_thread),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(&mut self) {
        self.cancellation_token.cancel();
        // The thread notices the token within one debounce interval.
        self.debounce_thread.take();
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// One changed path per affected directory, skipping hidden and partial files.
pub fn scopes_for(root: &Path, paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut scopes = BTreeMap::new();
    for path in paths {
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if hidden {
            continue;
        }
        scopes
            .entry(scope_directory(root, path))
            .or_insert_with(|| path.clone());
    }
    scopes.into_values().collect()
}

/// Re-run `upload` for every batch of changes under the sync root until a stop is requested.
pub async fn monitor(engine: Arc<SyncEngine>) -> Result<()> {
    let root = engine.config().sync_root.clone();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut watcher = ChangeWatcher::start(root.clone(), DEFAULT_DEBOUNCE, move |paths| {
        let _ = tx.send(paths);
    })?;
    info!("Watching {} for changes, press Ctrl-C to quit", root.display());

    let cancel = Arc::clone(engine.cancellation());
    loop {
        tokio::select! {
            biased;
            _ = cancel.stopped() => break,
            batch = rx.recv() => {
                let Some(paths) = batch else {
                    warn!("Change watcher stopped unexpectedly");
                    break;
                };
                for changed in scopes_for(&root, &paths) {
                    match engine.upload(Some(changed.as_path())).await {
                        Ok(report) if report.uploaded > 0 => {
                            info!("Uploaded {} new item(s) after change in {}", report.uploaded, changed.display());
                        }
                        Ok(_) => {}
                        Err(e) => error!("Upload after change in {} failed: {e}", changed.display()),
                    }
                }
            }
        }
    }

    watcher.stop();
    info!("Stopped watching {}", root.display());
    Ok(())
}
