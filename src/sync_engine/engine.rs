use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationController;
use crate::config::{ExtensionFilter, SyncConfig};
use crate::error::{Result, SyncError};
use crate::local::LocalProvider;
use crate::path_validation::{item_destination, normalize_separators, scope_directory, set_directory};
use crate::remote::RemoteClient;
use crate::sync_engine::types::{
    Direction, LocalMetadata, MediaItem, OversizedItem, RemoteItems, SkipReason, SyncMode,
    SyncReport, TransferEvent, TransferFailure, TransferTask, DOWNLOAD_ALL, MAX_UPLOAD_BYTES,
};
use crate::transfer::{TransferOutcome, TransferPool};

pub type ProgressObserver = Arc<dyn Fn(TransferEvent<'_>) + Send + Sync>;

/// Reconciles the local tree with the remote sets.
///
/// Every call recomputes the difference from a fresh scan and listing; no
/// state survives between calls.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    filter: ExtensionFilter,
    local: Arc<dyn LocalProvider>,
    remote: Arc<dyn RemoteClient>,
    cancel: Arc<CancellationController>,
    observer: Option<ProgressObserver>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalProvider>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        let filter = config.extension_filter();
        Self {
            config: Arc::new(config),
            filter,
            local,
            remote,
            cancel: Arc::new(CancellationController::new()),
            observer: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: Arc<CancellationController>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &Arc<CancellationController> {
        &self.cancel
    }

    fn root(&self) -> &Path {
        &self.config.sync_root
    }

    fn scope_dir(&self, scope: Option<&Path>) -> PathBuf {
        match scope {
            Some(changed) => scope_directory(self.root(), changed),
            None => self.root().to_path_buf(),
        }
    }

    /// Remote set matching a local set name, honouring cross-platform separators.
    fn remote_set_for<'s>(&self, remote_sets: &'s BTreeMap<String, String>, set: &str) -> Option<&'s str> {
        if let Some((name, _)) = remote_sets.get_key_value(set) {
            return Some(name.as_str());
        }
        if self.config.cross_platform_paths {
            return remote_sets
                .keys()
                .find(|name| normalize_separators(name) == set)
                .map(String::as_str);
        }
        None
    }

    /// (set name, display title) for every local set under `scope`.
    pub async fn preview_set_titles(&self, scope: Option<&Path>) -> Result<Vec<(String, String)>> {
        let local = self
            .local
            .scan(self.root(), &self.scope_dir(scope), &self.filter)
            .await?;
        Ok(local
            .keys()
            .map(|set| (set.clone(), self.remote.display_title(set)))
            .collect())
    }

    /// Upload local items missing from their remote set.
    ///
    /// `scope` limits the scan to the directory containing the given path.
    pub async fn upload(&self, scope: Option<&Path>) -> Result<SyncReport> {
        let local = self
            .local
            .scan(self.root(), &self.scope_dir(scope), &self.filter)
            .await?;
        info!("Found {} photo sets", local.len());
        let remote_sets = self.remote.list_sets().await?;

        let mut run = Run::new(self);
        for (set, items) in &local {
            if run.should_stop() {
                break;
            }

            let title = self.remote.display_title(set);
            info!("Getting photos in set [{title}]");
            let remote_set = self.remote_set_for(&remote_sets, set).unwrap_or(set.as_str());
            let Some(remote_items) = run.list_remote(remote_set, &remote_sets, false).await else {
                continue;
            };
            info!("Found {} photos", remote_items.len());

            let proceed = run.schedule_uploads(set, remote_set, &title, items, &remote_items);
            run.report.remote.insert(remote_set.to_string(), remote_items);
            run.drain().await;
            if !proceed {
                break;
            }
        }

        run.report.local = local;
        Ok(run.finish().await)
    }

    /// Download remote sets named `target`, prefixed by it, or all sets for `"."`.
    pub async fn download(&self, target: &str) -> Result<SyncReport> {
        let remote_sets = self.remote.list_sets().await?;

        let mut run = Run::new(self);
        for set in remote_sets.keys() {
            if set.is_empty() || !(target == DOWNLOAD_ALL || set.starts_with(target)) {
                continue;
            }
            let proceed = run.download_set(set).await;
            run.drain().await;
            if !proceed {
                break;
            }
        }

        Ok(run.finish().await)
    }

    /// Two-way reconciliation. Only `"all"` is supported; any other mode is
    /// reported as a warning and performs no transfers.
    pub async fn sync(&self, mode: &str) -> Result<SyncReport> {
        match mode.parse::<SyncMode>() {
            Ok(SyncMode::All) => self.sync_all().await,
            Err(e) => {
                warn!("{e}");
                Ok(SyncReport::default())
            }
        }
    }

    async fn sync_all(&self) -> Result<SyncReport> {
        let root = self.root();
        let local = self.local.scan(root, root, &self.filter).await?;
        let remote_sets = self.remote.list_sets().await?;
        let cross = self.config.cross_platform_paths;

        let mut run = Run::new(self);
        run.report.local = local.clone();

        // Remote sets without a local directory are fetched whole. Matching is exact.
        for set in remote_sets.keys() {
            let known = local.contains_key(set)
                || (cross && local.contains_key(&normalize_separators(set)));
            if set.is_empty() || known {
                continue;
            }
            let proceed = run.download_set(set).await;
            run.drain().await;
            if !proceed {
                return Ok(run.finish().await);
            }
        }

        for (set, items) in &local {
            if run.should_stop() {
                break;
            }

            let remote_set = self.remote_set_for(&remote_sets, set).unwrap_or(set.as_str());
            let Some(remote_items) = run.list_remote(remote_set, &remote_sets, true).await else {
                continue;
            };
            run.report.remote.insert(remote_set.to_string(), remote_items.clone());

            let dir = match set_directory(root, set, false) {
                Ok(dir) => dir,
                Err(e) => {
                    warn!("Skipped set [{set}]: {e}");
                    continue;
                }
            };

            let local_names: HashSet<&str> = items.iter().map(|i| i.filename.as_str()).collect();
            let mut missing: Vec<&String> = remote_items
                .keys()
                .filter(|name| {
                    !local_names.contains(name.as_str())
                        && !(cross && local_names.contains(normalize_separators(name).as_str()))
                })
                .collect();
            missing.sort();

            let mut proceed = true;
            for filename in missing {
                if run.should_stop() {
                    proceed = false;
                    break;
                }
                run.schedule_download(set, &dir, filename, &remote_items[filename]).await;
            }
            // Downloads for this set must land before any upload for it starts.
            run.drain().await;
            if !proceed {
                break;
            }

            let title = self.remote.display_title(set);
            let proceed = run.schedule_uploads(set, remote_set, &title, items, &remote_items);
            run.drain().await;
            if !proceed {
                break;
            }
        }

        Ok(run.finish().await)
    }
}

/// State of a single upload, download or sync call.
struct Run<'a> {
    engine: &'a SyncEngine,
    pool: TransferPool,
    report: SyncReport,
}

impl<'a> Run<'a> {
    fn new(engine: &'a SyncEngine) -> Self {
        Self {
            engine,
            pool: TransferPool::new(engine.config.max_concurrent_transfers),
            report: SyncReport::default(),
        }
    }

    fn emit(&self, event: TransferEvent<'_>) {
        if let Some(observer) = &self.engine.observer {
            observer(event);
        }
    }

    /// Checked before every scheduling decision.
    fn should_stop(&mut self) -> bool {
        if !self.engine.cancel.is_stopping() {
            return false;
        }
        if !self.report.interrupted {
            info!("To avoid data loss, the process will be terminated once ongoing transfers complete");
            self.report.interrupted = true;
        }
        true
    }

    fn skip(&mut self, direction: Direction, set: &str, filename: &str, reason: SkipReason) {
        match reason {
            SkipReason::AlreadyPresent => self.report.already_present += 1,
            SkipReason::Ignored => self.report.ignored += 1,
            SkipReason::NotMedia | SkipReason::Oversized => {}
        }
        self.emit(TransferEvent::Skipped {
            direction,
            set,
            filename,
            reason,
        });
    }

    fn record_failure(&mut self, direction: Direction, set: &str, filename: &str, message: String) {
        error!("Failed to {direction} [{set}/{filename}]: {message}");
        self.report.failures.push(TransferFailure {
            direction,
            set: set.to_string(),
            filename: filename.to_string(),
            message,
        });
    }

    /// Items of `remote_set`, or an empty map when the set does not exist remotely.
    /// Listing failures are recorded and yield `None`.
    async fn list_remote(
        &mut self,
        remote_set: &str,
        remote_sets: &BTreeMap<String, String>,
        include_ref: bool,
    ) -> Option<RemoteItems> {
        if !remote_sets.contains_key(remote_set) {
            return Some(RemoteItems::new());
        }
        match self.engine.remote.list_items(remote_set, include_ref).await {
            Ok(items) => Some(items),
            Err(e) => {
                let direction = if include_ref { Direction::Download } else { Direction::Upload };
                self.record_failure(direction, remote_set, "", format!("listing failed: {e}"));
                None
            }
        }
    }

    fn spawn_upload(&mut self, set: &str, remote_set: &str, filename: &str, source: PathBuf) {
        let task = TransferTask {
            direction: Direction::Upload,
            set: set.to_string(),
            filename: filename.to_string(),
            source: source.to_string_lossy().into_owned(),
            destination: remote_set.to_string(),
        };
        self.emit(TransferEvent::Scheduled(&task));

        let remote = Arc::clone(&self.engine.remote);
        let filename = task.filename.clone();
        let remote_set = task.destination.clone();
        self.pool.spawn(task, async move {
            remote.upload(&source, &filename, &remote_set).await
        });
    }

    fn spawn_download(&mut self, set: &str, filename: &str, item_ref: &str, destination: PathBuf) {
        let task = TransferTask {
            direction: Direction::Download,
            set: set.to_string(),
            filename: filename.to_string(),
            source: item_ref.to_string(),
            destination: destination.to_string_lossy().into_owned(),
        };
        self.emit(TransferEvent::Scheduled(&task));

        let remote = Arc::clone(&self.engine.remote);
        let item_ref = task.source.clone();
        self.pool.spawn(task, async move {
            remote
                .download(&item_ref, &destination)
                .await
                .map(|()| None::<String>)
        });
    }

    /// Queue uploads for local items of `set` that `remote_items` lacks.
    /// Returns `false` once a stop was requested.
    fn schedule_uploads(
        &mut self,
        set: &str,
        remote_set: &str,
        title: &str,
        items: &[MediaItem],
        remote_items: &RemoteItems,
    ) -> bool {
        let engine = self.engine;
        let cross = engine.config.cross_platform_paths;
        let dir = match set_directory(engine.root(), set, false) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Skipped set [{set}]: {e}");
                return true;
            }
        };

        for item in items {
            if self.should_stop() {
                return false;
            }
            let filename = item.filename.as_str();
            if engine.filter.is_ignored(filename) {
                self.skip(Direction::Upload, set, filename, SkipReason::Ignored);
                continue;
            }

            let present = remote_items.contains_key(filename)
                || (cross && remote_items.contains_key(&normalize_separators(filename)));
            if present {
                info!("Skipped [{filename}] already exists in set [{title}]");
                self.skip(Direction::Upload, set, filename, SkipReason::AlreadyPresent);
                continue;
            }

            info!("Uploading [{filename}] to set [{title}]");
            let source = dir.join(filename);
            if item.metadata.size >= MAX_UPLOAD_BYTES {
                let message = SyncError::SizeLimitExceeded {
                    filename: filename.to_string(),
                    size: item.metadata.size,
                    limit: MAX_UPLOAD_BYTES,
                }
                .to_string();
                error!("{message}");
                self.report.oversized.push(OversizedItem {
                    set: set.to_string(),
                    path: source,
                    size: item.metadata.size,
                    message,
                });
                self.skip(Direction::Upload, set, filename, SkipReason::Oversized);
                continue;
            }
            self.spawn_upload(set, remote_set, filename, source);
        }
        true
    }

    /// Queue downloads for every item of a remote set not present at its local destination.
    /// Returns `false` once a stop was requested.
    async fn download_set(&mut self, set: &str) -> bool {
        let engine = self.engine;
        let dir = match set_directory(engine.root(), set, engine.config.cross_platform_paths) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Skipped set [{set}]: {e}");
                return true;
            }
        };

        info!("Getting photos in set [{set}]");
        let items = match engine.remote.list_items(set, true).await {
            Ok(items) => items,
            Err(e) => {
                self.record_failure(Direction::Download, set, "", format!("listing failed: {e}"));
                return true;
            }
        };

        let mut names: Vec<&String> = items.keys().collect();
        names.sort();

        let mut proceed = true;
        for filename in names {
            if self.should_stop() {
                proceed = false;
                break;
            }
            self.schedule_download(set, &dir, filename, &items[filename]).await;
        }

        self.report.remote.insert(set.to_string(), items);
        proceed
    }

    /// Queue one download unless the item is filtered out or its destination
    /// already exists. Existing local files are never overwritten.
    async fn schedule_download(&mut self, set: &str, dir: &Path, filename: &str, item_ref: &str) {
        let engine = self.engine;
        if engine.filter.is_ignored(filename) {
            self.skip(Direction::Download, set, filename, SkipReason::Ignored);
            return;
        }
        if !engine.filter.is_media(filename) {
            debug!("Skipped [{set}/{filename}] not a media file");
            self.skip(Direction::Download, set, filename, SkipReason::NotMedia);
            return;
        }

        let destination = match item_destination(dir, filename) {
            Ok(destination) => destination,
            Err(e) => {
                self.record_failure(Direction::Download, set, filename, e.to_string());
                return;
            }
        };

        match engine.local.exists(&destination).await {
            Ok(true) => {
                info!("Skipped [{set}/{filename}] already downloaded");
                self.skip(Direction::Download, set, filename, SkipReason::AlreadyPresent);
            }
            Ok(false) => {
                info!("Downloading photo [{set}/{filename}]");
                self.spawn_download(set, filename, item_ref, destination);
            }
            Err(e) => self.record_failure(Direction::Download, set, filename, e.to_string()),
        }
    }

    /// Barrier: wait for every spawned transfer and fold the results into the indices.
    async fn drain(&mut self) {
        for outcome in self.pool.drain().await {
            self.fold(outcome).await;
        }
    }

    async fn fold(&mut self, outcome: TransferOutcome) {
        let TransferOutcome { task, result, .. } = outcome;
        match (task.direction, result) {
            (Direction::Upload, Ok(Some(id))) => {
                info!("Uploaded [{}] to set [{}]", task.filename, task.destination);
                self.report
                    .remote
                    .entry(task.destination.clone())
                    .or_default()
                    .insert(task.filename.clone(), id);
                self.report.uploaded += 1;
                self.emit(TransferEvent::Completed(&task));
            }
            (Direction::Download, Ok(_)) => {
                let path = PathBuf::from(&task.destination);
                let metadata = match self.engine.local.stat(&path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        debug!("Could not stat {}: {e}", path.display());
                        LocalMetadata::default()
                    }
                };
                let entries = self.report.local.entry(task.set.clone()).or_default();
                if !entries.iter().any(|i| i.filename == task.filename) {
                    entries.push(MediaItem::new(task.filename.clone(), metadata));
                    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
                }
                self.report.downloaded += 1;
                self.emit(TransferEvent::Completed(&task));
            }
            (direction, result) => {
                let message = match result {
                    Err(e) => e.to_string(),
                    Ok(_) => "remote service returned no id".to_string(),
                };
                self.emit(TransferEvent::Failed(&task, &message));
                self.record_failure(direction, &task.set, &task.filename, message);
            }
        }
    }

    async fn finish(mut self) -> SyncReport {
        self.drain().await;
        self.report
    }
}
