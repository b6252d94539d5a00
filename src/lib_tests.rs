#[cfg(test)]
mod integration_tests {
    use crate::cancel::CancellationController;
    use crate::config::{ExtensionFilter, SyncConfig};
    use crate::error::Result;
    use crate::local::{FsLocalProvider, LocalProvider};
    use crate::path_validation::set_name_for;
    use crate::remote::{DirectoryRemote, RemoteClient};
    use crate::sync_engine::types::{
        Direction, LocalIndex, LocalMetadata, MediaItem, RemoteItems, SkipReason, TransferEvent,
        MAX_UPLOAD_BYTES,
    };
    use crate::sync_engine::SyncEngine;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    const ROOT: &str = "/photos";
    const FAKE_ID: &str = "45";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        Start(Direction, String, String),
        Finish(Direction, String, String),
    }

    /// Shared in-memory state behind the fake local tree and fake album service.
    #[derive(Default)]
    struct World {
        local: Mutex<LocalIndex>,
        remote_sets: Mutex<BTreeMap<String, String>>,
        remote_items: Mutex<HashMap<String, RemoteItems>>,
        steps: Mutex<Vec<Step>>,
        stop_on_upload: Mutex<Option<Arc<CancellationController>>>,
    }

    impl World {
        fn scenario() -> Arc<Self> {
            let world = World::default();
            world.add_local("dirname", "file1.jpg", 100);
            world.add_local("dirname", "file2.avi", 100);
            world.add_remote_set("dirname", "12345");
            world.add_remote("12345", "file3.jpg");
            world.add_remote("12345", "file4.avi");
            Arc::new(world)
        }

        fn add_local(&self, set: &str, filename: &str, size: u64) {
            let mut local = self.local.lock().unwrap();
            let items = local.entry(set.to_string()).or_default();
            items.push(MediaItem::new(filename, LocalMetadata { size, modified: None }));
            items.sort_by(|a, b| a.filename.cmp(&b.filename));
        }

        fn add_remote_set(&self, set: &str, id: &str) {
            self.remote_sets
                .lock()
                .unwrap()
                .insert(set.to_string(), id.to_string());
            self.remote_items.lock().unwrap().entry(id.to_string()).or_default();
        }

        fn add_remote(&self, set_id: &str, filename: &str) {
            self.remote_items
                .lock()
                .unwrap()
                .entry(set_id.to_string())
                .or_default()
                .insert(filename.to_string(), "23".to_string());
        }

        fn local_names(&self, set: &str) -> Vec<String> {
            let local = self.local.lock().unwrap();
            let mut names: Vec<String> = local
                .get(set)
                .map(|items| items.iter().map(|i| i.filename.clone()).collect())
                .unwrap_or_default();
            names.sort();
            names
        }

        fn remote_of(&self, set: &str) -> RemoteItems {
            let id = self.remote_sets.lock().unwrap().get(set).cloned();
            id.and_then(|id| self.remote_items.lock().unwrap().get(&id).cloned())
                .unwrap_or_default()
        }

        fn remote_names(&self, set: &str) -> Vec<String> {
            let mut names: Vec<String> = self.remote_of(set).into_keys().collect();
            names.sort();
            names
        }

        fn steps(&self) -> Vec<Step> {
            self.steps.lock().unwrap().clone()
        }

        fn record(&self, step: Step) {
            self.steps.lock().unwrap().push(step);
        }
    }

    struct FakeLocal {
        world: Arc<World>,
    }

    #[async_trait]
    impl LocalProvider for FakeLocal {
        async fn scan(&self, _root: &Path, _scope: &Path, filter: &ExtensionFilter) -> Result<LocalIndex> {
            let local = self.world.local.lock().unwrap();
            Ok(local
                .iter()
                .map(|(set, items)| {
                    let items = items
                        .iter()
                        .filter(|i| filter.is_media(&i.filename))
                        .cloned()
                        .collect();
                    (set.clone(), items)
                })
                .collect())
        }

        async fn stat(&self, _path: &Path) -> Result<LocalMetadata> {
            Ok(LocalMetadata { size: 100, modified: None })
        }

        async fn exists(&self, path: &Path) -> Result<bool> {
            let set = path
                .parent()
                .and_then(|dir| set_name_for(Path::new(ROOT), dir))
                .unwrap_or_default();
            let filename = path.file_name().unwrap().to_string_lossy().into_owned();
            Ok(self.world.local_names(&set).contains(&filename))
        }
    }

    struct FakeRemote {
        world: Arc<World>,
    }

    #[async_trait]
    impl RemoteClient for FakeRemote {
        async fn list_sets(&self) -> Result<BTreeMap<String, String>> {
            Ok(self.world.remote_sets.lock().unwrap().clone())
        }

        async fn list_items(&self, set: &str, include_ref: bool) -> Result<RemoteItems> {
            let items = self.world.remote_of(set);
            if include_ref {
                Ok(items
                    .into_keys()
                    .map(|name| {
                        let reference = format!("ref:{set}/{name}");
                        (name, reference)
                    })
                    .collect())
            } else {
                Ok(items)
            }
        }

        fn display_title(&self, set: &str) -> String {
            set.rsplit('/').next().unwrap_or(set).to_string()
        }

        async fn upload(&self, _local_path: &Path, filename: &str, set: &str) -> Result<Option<String>> {
            self.world
                .record(Step::Start(Direction::Upload, set.to_string(), filename.to_string()));
            tokio::time::sleep(Duration::from_millis(5)).await;

            if let Some(controller) = self.world.stop_on_upload.lock().unwrap().as_ref() {
                controller.request_stop();
            }

            let id = if filename.starts_with("fail") {
                None
            } else {
                let set_id = {
                    let mut sets = self.world.remote_sets.lock().unwrap();
                    sets.entry(set.to_string())
                        .or_insert_with(|| format!("new-{set}"))
                        .clone()
                };
                self.world
                    .remote_items
                    .lock()
                    .unwrap()
                    .entry(set_id)
                    .or_default()
                    .insert(filename.to_string(), FAKE_ID.to_string());
                Some(FAKE_ID.to_string())
            };

            self.world
                .record(Step::Finish(Direction::Upload, set.to_string(), filename.to_string()));
            Ok(id)
        }

        async fn download(&self, _item_ref: &str, destination: &Path) -> Result<()> {
            let set = destination
                .parent()
                .and_then(|dir| set_name_for(Path::new(ROOT), dir))
                .unwrap_or_default();
            let filename = destination.file_name().unwrap().to_string_lossy().into_owned();

            self.world
                .record(Step::Start(Direction::Download, set.clone(), filename.clone()));
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.world.add_local(&set, &filename, 100);
            self.world
                .record(Step::Finish(Direction::Download, set, filename));
            Ok(())
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            sync_root: PathBuf::from(ROOT),
            cross_platform_paths: false,
            ..SyncConfig::default()
        }
    }

    fn engine_with(world: &Arc<World>, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(
            config,
            Arc::new(FakeLocal { world: Arc::clone(world) }),
            Arc::new(FakeRemote { world: Arc::clone(world) }),
        )
    }

    fn engine(world: &Arc<World>) -> SyncEngine {
        engine_with(world, config())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn all_four() -> Vec<String> {
        names(&["file1.jpg", "file2.avi", "file3.jpg", "file4.avi"])
    }

    #[tokio::test]
    async fn test_upload_scenario() {
        let world = World::scenario();
        let report = engine(&world).upload(None).await.unwrap();

        assert_eq!(report.uploaded, 2);
        assert!(report.is_clean());
        assert_eq!(world.remote_names("dirname"), all_four());

        let remote = world.remote_of("dirname");
        assert_eq!(remote["file1.jpg"], FAKE_ID);
        assert_eq!(remote["file2.avi"], FAKE_ID);
        assert_eq!(remote["file3.jpg"], "23");

        // The run's own index saw the new ids without re-listing.
        let indexed = &report.remote["dirname"];
        assert_eq!(indexed.len(), 4);
        assert_eq!(indexed["file1.jpg"], FAKE_ID);
    }

    #[tokio::test]
    async fn test_download_scenario() {
        let world = World::scenario();
        let report = engine(&world).download(".").await.unwrap();

        assert_eq!(report.downloaded, 2);
        assert_eq!(world.local_names("dirname"), all_four());
        let downloaded: Vec<_> = report.local["dirname"].iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(downloaded, vec!["file3.jpg", "file4.avi"]);
    }

    #[tokio::test]
    async fn test_sync_scenario() {
        let world = World::scenario();
        let report = engine(&world).sync("all").await.unwrap();

        assert_eq!(report.uploaded, 2);
        assert_eq!(report.downloaded, 2);
        assert_eq!(world.local_names("dirname"), all_four());
        assert_eq!(world.remote_names("dirname"), all_four());

        let local: Vec<_> = report.local["dirname"].iter().map(|i| i.filename.clone()).collect();
        assert_eq!(local, all_four());
        assert_eq!(report.remote["dirname"].len(), 4);
    }

    #[tokio::test]
    async fn test_second_upload_transfers_nothing() {
        let world = World::scenario();
        let engine = engine(&world);

        engine.upload(None).await.unwrap();
        let before = world.steps().len();

        let report = engine.upload(None).await.unwrap();
        assert_eq!(report.transferred(), 0);
        assert_eq!(report.already_present, 2);
        assert_eq!(world.steps().len(), before);
    }

    #[tokio::test]
    async fn test_second_sync_transfers_nothing() {
        let world = World::scenario();
        let engine = engine(&world);

        engine.sync("all").await.unwrap();
        let report = engine.sync("all").await.unwrap();
        assert_eq!(report.transferred(), 0);
    }

    #[tokio::test]
    async fn test_sync_drains_downloads_before_uploads() {
        let world = World::scenario();
        for i in 0..6 {
            world.add_local("dirname", &format!("local{i}.jpg"), 10);
            world.add_remote("12345", &format!("remote{i}.jpg"));
        }
        world.add_local("other", "x.png", 10);
        world.add_remote_set("other", "777");
        world.add_remote("777", "y.png");

        engine(&world).sync("all").await.unwrap();
        let steps = world.steps();

        for set in ["dirname", "other"] {
            let last_download_finish = steps
                .iter()
                .rposition(|s| matches!(s, Step::Finish(Direction::Download, ss, _) if ss == set))
                .expect("downloads for set");
            let first_upload_start = steps
                .iter()
                .position(|s| matches!(s, Step::Start(Direction::Upload, ss, _) if ss == set))
                .expect("uploads for set");
            assert!(last_download_finish < first_upload_start, "set {set}: {steps:?}");
        }
    }

    #[tokio::test]
    async fn test_ignored_extensions_are_never_transferred() {
        let world = World::scenario();
        let config = SyncConfig {
            ignore_extensions: vec!["avi".to_string()],
            ..config()
        };
        let report = engine_with(&world, config).sync("all").await.unwrap();

        assert!(world
            .steps()
            .iter()
            .all(|s| !matches!(s, Step::Start(_, _, name) if name.ends_with(".avi"))));
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.ignored, 1);
    }

    #[tokio::test]
    async fn test_ignore_images_on_download() {
        let world = World::scenario();
        let config = SyncConfig {
            ignore_images: true,
            ..config()
        };
        let report = engine_with(&world, config).download(".").await.unwrap();

        assert_eq!(report.downloaded, 1);
        assert_eq!(world.local_names("dirname"), names(&["file1.jpg", "file2.avi", "file4.avi"]));
    }

    #[tokio::test]
    async fn test_stop_before_run_spawns_nothing() {
        let world = World::scenario();
        let controller = Arc::new(CancellationController::new());
        controller.request_stop();

        let engine = engine(&world).with_cancellation(controller);
        for report in [
            engine.upload(None).await.unwrap(),
            engine.download(".").await.unwrap(),
            engine.sync("all").await.unwrap(),
        ] {
            assert!(report.interrupted);
            assert_eq!(report.transferred(), 0);
        }
        assert!(world.steps().is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_run_drains_in_flight_work() {
        let world = Arc::new(World::default());
        world.add_local("a", "1.jpg", 10);
        world.add_local("a", "2.jpg", 10);
        world.add_local("b", "3.jpg", 10);

        let controller = Arc::new(CancellationController::new());
        *world.stop_on_upload.lock().unwrap() = Some(Arc::clone(&controller));

        let report = engine(&world)
            .with_cancellation(controller)
            .upload(None)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.uploaded, 2);
        assert_eq!(world.remote_names("a"), names(&["1.jpg", "2.jpg"]));
        assert!(world.remote_names("b").is_empty());

        let steps = world.steps();
        let started = steps.iter().filter(|s| matches!(s, Step::Start(..))).count();
        let finished = steps.iter().filter(|s| matches!(s, Step::Finish(..))).count();
        assert_eq!(started, finished);
    }

    #[tokio::test]
    async fn test_unsupported_sync_mode() {
        let world = World::scenario();
        let report = engine(&world).sync("newest").await.unwrap();

        assert_eq!(report.transferred(), 0);
        assert!(report.failures.is_empty());
        assert!(world.steps().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_items_are_reported_not_uploaded() {
        let world = Arc::new(World::default());
        world.add_local("big", "huge.mov", MAX_UPLOAD_BYTES);
        world.add_local("big", "small.mov", MAX_UPLOAD_BYTES - 1);

        let report = engine(&world).upload(None).await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.oversized.len(), 1);
        assert_eq!(report.oversized[0].size, MAX_UPLOAD_BYTES);
        assert!(report.oversized[0].message.contains("huge.mov"));
        assert!(report.oversized[0].message.contains("over size limit"));
        assert_eq!(world.remote_names("big"), names(&["small.mov"]));
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_stop_siblings() {
        let world = World::scenario();
        world.add_local("dirname", "fail.jpg", 10);

        let report = engine(&world).upload(None).await.unwrap();

        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].filename, "fail.jpg");
        assert!(!report.remote["dirname"].contains_key("fail.jpg"));
    }

    #[tokio::test]
    async fn test_download_target_prefix() {
        let world = Arc::new(World::default());
        for (set, id) in [("2023", "1"), ("2023-trip", "2"), ("2024", "3")] {
            world.add_remote_set(set, id);
            world.add_remote(id, &format!("{set}.jpg"));
        }

        let report = engine(&world).download("2023").await.unwrap();

        assert_eq!(report.downloaded, 2);
        assert_eq!(world.local_names("2023"), names(&["2023.jpg"]));
        assert_eq!(world.local_names("2023-trip"), names(&["2023-trip.jpg"]));
        assert!(world.local_names("2024").is_empty());
    }

    #[tokio::test]
    async fn test_download_skips_existing_destinations() {
        let world = World::scenario();
        world.add_local("dirname", "file3.jpg", 100);

        let report = engine(&world).download(".").await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.already_present, 1);
    }

    #[tokio::test]
    async fn test_sync_fetches_remote_only_sets() {
        let world = World::scenario();
        world.add_remote_set("2022/Holidays", "999");
        world.add_remote("999", "beach.jpg");

        engine(&world).sync("all").await.unwrap();
        assert_eq!(world.local_names("2022/Holidays"), names(&["beach.jpg"]));
    }

    #[tokio::test]
    async fn test_sync_creates_remote_sets_for_local_only_sets() {
        let world = World::scenario();
        world.add_local("fresh", "new.png", 10);

        engine(&world).sync("all").await.unwrap();
        assert_eq!(world.remote_names("fresh"), names(&["new.png"]));
    }

    #[tokio::test]
    async fn test_cross_platform_set_names_match() {
        let world = Arc::new(World::default());
        world.add_local("trips/paris", "a.jpg", 10);
        world.add_remote_set("trips\\paris", "1");
        world.add_remote("1", "a.jpg");

        let config = SyncConfig {
            cross_platform_paths: true,
            ..config()
        };
        let report = engine_with(&world, config).sync("all").await.unwrap();

        assert_eq!(report.transferred(), 0);
        assert!(world.steps().is_empty());
    }

    #[tokio::test]
    async fn test_progress_events() {
        let world = World::scenario();
        world.add_remote("12345", "readme.txt");
        world.add_local("dirname", "clip.mts", 10);
        world.add_local("dirname", "huge.mov", MAX_UPLOAD_BYTES);
        world.add_remote("12345", "huge.mov");
        world.add_local("dirname", "big.mp4", MAX_UPLOAD_BYTES);

        let scheduled = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(Mutex::new(Vec::new()));

        let observer = {
            let scheduled = Arc::clone(&scheduled);
            let completed = Arc::clone(&completed);
            let skipped = Arc::clone(&skipped);
            Arc::new(move |event: TransferEvent<'_>| match event {
                TransferEvent::Scheduled(_) => {
                    scheduled.fetch_add(1, Ordering::SeqCst);
                }
                TransferEvent::Completed(_) => {
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                TransferEvent::Failed(..) => {}
                TransferEvent::Skipped {
                    direction,
                    filename,
                    reason,
                    ..
                } => skipped
                    .lock()
                    .unwrap()
                    .push((direction, filename.to_string(), reason)),
            })
        };

        let config = SyncConfig {
            ignore_extensions: vec!["mts".to_string()],
            ..config()
        };
        let report = engine_with(&world, config)
            .with_progress(observer)
            .sync("all")
            .await
            .unwrap();

        assert_eq!(scheduled.load(Ordering::SeqCst), 4);
        assert_eq!(completed.load(Ordering::SeqCst) as u64, report.transferred());

        // clip.mts is dropped by the scan and produces no event.
        let mut skipped = skipped.lock().unwrap().clone();
        skipped.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            skipped,
            vec![
                (Direction::Upload, "big.mp4".to_string(), SkipReason::Oversized),
                (Direction::Upload, "huge.mov".to_string(), SkipReason::AlreadyPresent),
                (Direction::Download, "readme.txt".to_string(), SkipReason::NotMedia),
            ]
        );
        assert_eq!(report.already_present, 1);
        assert_eq!(report.oversized.len(), 1);
    }

    #[tokio::test]
    async fn test_preview_set_titles() {
        let world = World::scenario();
        world.add_local("2023/Trip", "x.jpg", 1);

        let titles = engine(&world).preview_set_titles(None).await.unwrap();
        assert_eq!(
            titles,
            vec![
                ("2023/Trip".to_string(), "Trip".to_string()),
                ("dirname".to_string(), "dirname".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_filesystem_round_trip_converges() -> Result<()> {
        let local_dir = TempDir::new()?;
        let store_dir = TempDir::new()?;
        let root = local_dir.path().canonicalize()?;

        std::fs::create_dir_all(root.join("dirname"))?;
        std::fs::write(root.join("dirname/file1.jpg"), b"one")?;
        std::fs::write(root.join("dirname/file2.avi"), b"two")?;
        std::fs::create_dir_all(store_dir.path().join("dirname"))?;
        std::fs::write(store_dir.path().join("dirname/file3.jpg"), b"three")?;
        std::fs::create_dir_all(store_dir.path().join("remote-only"))?;
        std::fs::write(store_dir.path().join("remote-only/file5.png"), b"five")?;

        let remote = Arc::new(DirectoryRemote::open(store_dir.path())?);
        let engine = SyncEngine::new(
            SyncConfig {
                sync_root: root.clone(),
                ..SyncConfig::default()
            },
            Arc::new(FsLocalProvider::new()),
            remote.clone(),
        );

        let report = engine.sync("all").await?;
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.downloaded, 2);
        assert!(report.failures.is_empty());

        assert_eq!(std::fs::read(root.join("dirname/file3.jpg"))?, b"three");
        assert_eq!(std::fs::read(root.join("remote-only/file5.png"))?, b"five");
        let mut remote_names: Vec<_> = remote.list_items("dirname", false).await?.into_keys().collect();
        remote_names.sort();
        assert_eq!(remote_names, names(&["file1.jpg", "file2.avi", "file3.jpg"]));

        let again = engine.sync("all").await?;
        assert_eq!(again.transferred(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_sync_never_overwrites_local_files() -> Result<()> {
        let local_dir = TempDir::new()?;
        let store_dir = TempDir::new()?;
        let root = local_dir.path().canonicalize()?;

        std::fs::create_dir_all(root.join("dirname"))?;
        std::fs::write(root.join("dirname/photo.jpg"), b"photo")?;
        std::fs::write(root.join("dirname/notes.txt"), b"LOCAL")?;
        std::fs::create_dir_all(store_dir.path().join("dirname"))?;
        std::fs::write(store_dir.path().join("dirname/notes.txt"), b"REMOTE")?;
        std::fs::write(store_dir.path().join("dirname/todo.txt"), b"REMOTE")?;

        let engine = SyncEngine::new(
            SyncConfig {
                sync_root: root.clone(),
                ..SyncConfig::default()
            },
            Arc::new(FsLocalProvider::new()),
            Arc::new(DirectoryRemote::open(store_dir.path())?),
        );

        let first = engine.sync("all").await?;
        assert_eq!(first.downloaded, 0);
        assert_eq!(first.uploaded, 1);
        assert_eq!(std::fs::read(root.join("dirname/notes.txt"))?, b"LOCAL");
        assert!(!root.join("dirname/todo.txt").exists());

        let second = engine.sync("all").await?;
        assert_eq!(second.transferred(), 0);
        assert_eq!(std::fs::read(root.join("dirname/notes.txt"))?, b"LOCAL");
        Ok(())
    }
}
