use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use glob::Pattern;
use log::{debug, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};

use crate::dispatcher::{Dispatcher, LoadPriority};
use crate::error::AssetResult;
use crate::id::AssetState;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved { old_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: SystemTime,
}

/// Pluggable source of raw filesystem events. `NotifyWatcher` is the one
/// platform-backed implementation; tests substitute a channel-fed stub.
pub trait ChangeWatcher: Send + Sync {
    fn poll(&self) -> Vec<FileChangeEvent>;
}

fn map_event(event: Event) -> Vec<FileChangeEvent> {
    let now = SystemTime::now();
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        _ => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .map(|path| FileChangeEvent {
            path,
            kind: kind.clone(),
            timestamp: now,
        })
        .collect()
}

/// `notify`-backed recursive directory watcher.
pub struct NotifyWatcher {
    _inner: RecommendedWatcher,
    receiver: crossbeam_channel::Receiver<FileChangeEvent>,
}

impl NotifyWatcher {
    pub fn new(root: &Path) -> AssetResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                for mapped in map_event(event) {
                    let _ = tx.send(mapped);
                }
            }
        })
        .map_err(|e| crate::error::AssetError::Internal(format!("failed to start watcher: {}", e)))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| crate::error::AssetError::Internal(format!("failed to watch '{}': {}", root.display(), e)))?;
        Ok(NotifyWatcher {
            _inner: watcher,
            receiver: rx,
        })
    }
}

impl ChangeWatcher for NotifyWatcher {
    fn poll(&self) -> Vec<FileChangeEvent> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug, Clone)]
pub struct HotReloadConfig {
    pub debounce: Duration,
    pub batch_window: Duration,
    pub ignore_patterns: Vec<String>,
    pub watched_extensions: Vec<String>,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        HotReloadConfig {
            debounce: Duration::from_millis(100),
            batch_window: Duration::from_millis(100),
            ignore_patterns: Vec::new(),
            watched_extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct HotReloadStats {
    pub files_watched: AtomicU64,
    pub reload_events: AtomicU64,
    pub successful_reloads: AtomicU64,
    pub failed_reloads: AtomicU64,
    pub ignored_events: AtomicU64,
}

struct PendingChange {
    kind: ChangeKind,
    seen_at: Instant,
}

/// Watches source files, debounces and batches changes, then cascades
/// reloads through the dependency graph in topological order. A reload
/// failure restores the previous payload from an in-memory backup.
pub struct HotReloadController {
    config: HotReloadConfig,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    watcher: Box<dyn ChangeWatcher>,
    pending: Mutex<HashMap<PathBuf, PendingChange>>,
    stats: Arc<HotReloadStats>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HotReloadController {
    pub fn new(
        config: HotReloadConfig,
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
        watcher: Box<dyn ChangeWatcher>,
    ) -> Self {
        HotReloadController {
            config,
            registry,
            dispatcher,
            watcher,
            pending: Mutex::new(HashMap::new()),
            stats: Arc::new(HotReloadStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> Arc<HotReloadStats> {
        Arc::clone(&self.stats)
    }

    fn accepts(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        for pattern in &self.config.ignore_patterns {
            if Pattern::new(pattern).map(|p| p.matches(&path_str)).unwrap_or(false) {
                return false;
            }
        }
        if self.config.watched_extensions.is_empty() {
            return true;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .config
                .watched_extensions
                .iter()
                .any(|w| w.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// One non-blocking sweep: drains watcher events into the debounce map,
    /// then flushes any path whose debounce window has elapsed. Exposed
    /// directly so tests can drive the pipeline without a background thread.
    pub fn tick(&self) {
        for event in self.watcher.poll() {
            if !self.accepts(&event.path) {
                self.stats.ignored_events.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                event.path.clone(),
                PendingChange {
                    kind: event.kind,
                    seen_at: Instant::now(),
                },
            );
        }

        let ready: Vec<(PathBuf, ChangeKind)> = {
            let mut pending = self.pending.lock().unwrap();
            let debounce = self.config.debounce;
            let mut ready = Vec::new();
            pending.retain(|path, change| {
                if change.seen_at.elapsed() >= debounce {
                    ready.push((path.clone(), change.kind.clone()));
                    false
                } else {
                    true
                }
            });
            ready
        };

        if !ready.is_empty() {
            self.process_batch(ready);
        }
    }

    fn process_batch(&self, changes: Vec<(PathBuf, ChangeKind)>) {
        let mut stale_ids = Vec::new();
        for (path, kind) in changes {
            self.stats.reload_events.fetch_add(1, Ordering::Relaxed);
            let path_str = path.to_string_lossy().replace('\\', "/");
            let Some(handle) = self.registry.find_by_path(&path_str) else {
                debug!("hot reload: no registered asset for '{}'", path_str);
                continue;
            };
            if kind == ChangeKind::Deleted {
                warn!("watched source file deleted: '{}'", path_str);
                continue;
            }
            let id = handle.id();
            stale_ids.push(id);
            let _ = self.registry.mark_stale(id);
            for dependent in self.registry.transitive_dependents(id) {
                stale_ids.push(dependent);
                let _ = self.registry.mark_stale(dependent);
            }
        }

        if stale_ids.is_empty() {
            return;
        }
        stale_ids.sort_unstable_by_key(|id| id.0);
        stale_ids.dedup();

        let order = self.registry.topological_load_order(&stale_ids);
        for id in order {
            self.reload_one(id);
        }
    }

    fn reload_one(&self, id: crate::id::AssetId) {
        let meta = match self.registry.get_metadata(id) {
            Ok(m) => m,
            Err(_) => return,
        };
        let backup = self
            .registry
            .raw_asset(id)
            .ok()
            .and_then(|asset| asset.highest_payload());

        if let Err(err) = self.dispatcher.invalidate_cache_entry(id, meta.current_quality) {
            warn!("failed to invalidate cache for '{}' before reload: {}", meta.path, err);
        }

        let result = self.dispatcher.submit_blocking(
            id,
            PathBuf::from(&meta.path),
            meta.asset_type,
            LoadPriority::High,
            meta.current_quality,
        );

        match result {
            Ok(_) => {
                self.stats.successful_reloads.fetch_add(1, Ordering::Relaxed);
                info!("reloaded '{}'", meta.path);
            }
            Err(err) => {
                self.stats.failed_reloads.fetch_add(1, Ordering::Relaxed);
                warn!("reload failed for '{}': {}, restoring previous payload", meta.path, err);
                if let (Some((quality, payload)), Ok(asset)) = (backup, self.registry.raw_asset(id)) {
                    asset.install_payload(quality, payload);
                    let _ = self.registry.set_state(id, AssetState::Loaded);
                }
            }
        }
    }

    pub fn mark_watched(&self, count: u64) {
        self.stats.files_watched.fetch_add(count, Ordering::Relaxed);
    }

    /// Debug snapshot of watcher activity, for operator tooling.
    pub fn report(&self) -> WatchReport {
        WatchReport {
            files_watched: self.stats.files_watched.load(Ordering::Relaxed),
            reload_events: self.stats.reload_events.load(Ordering::Relaxed),
            successful_reloads: self.stats.successful_reloads.load(Ordering::Relaxed),
            failed_reloads: self.stats.failed_reloads.load(Ordering::Relaxed),
            ignored_events: self.stats.ignored_events.load(Ordering::Relaxed),
            pending_changes: self.pending.lock().unwrap().len(),
        }
    }

    /// Spawns a background thread polling `tick()` at the configured batch
    /// window. Stopped on drop or by calling `stop`.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let interval = self.config.batch_window;
        let handle = std::thread::Builder::new()
            .name("asset-hot-reload".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    controller.tick();
                    std::thread::sleep(interval);
                }
            })
            .expect("failed to spawn hot reload thread");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HotReloadController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Human-readable dump of [`HotReloadController`] state.
#[derive(Debug, Clone, Copy)]
pub struct WatchReport {
    pub files_watched: u64,
    pub reload_events: u64,
    pub successful_reloads: u64,
    pub failed_reloads: u64,
    pub ignored_events: u64,
    pub pending_changes: usize,
}

impl fmt::Display for WatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hot_reload: watched={} events={} reloaded={} failed={} ignored={} pending={}",
            self.files_watched,
            self.reload_events,
            self.successful_reloads,
            self.failed_reloads,
            self.ignored_events,
            self.pending_changes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, DiskCache, EvictionPolicy, MemoryCache};
    use crate::id::AssetType;
    use crate::processor::ProcessorPipeline;
    use crate::source::{LocalFileSource, SourceChain};
    use std::fs;
    use std::sync::Mutex as StdMutex;

    struct StubWatcher {
        events: StdMutex<Vec<FileChangeEvent>>,
    }

    impl ChangeWatcher for StubWatcher {
        fn poll(&self) -> Vec<FileChangeEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn setup(dir: &Path) -> (Arc<Registry>, Arc<Dispatcher>) {
        let registry = Arc::new(Registry::new());
        let cache = Arc::new(Cache::new(
            MemoryCache::new(1024 * 1024, EvictionPolicy::Lru),
            DiskCache::new(dir.join("cache")).unwrap(),
        ));
        let mut chain = SourceChain::new();
        chain.register(0, Box::new(LocalFileSource::new(dir)));
        let dispatcher = Arc::new(Dispatcher::new(
            1,
            Arc::clone(&registry),
            cache,
            Arc::new(chain),
            Arc::new(ProcessorPipeline::new()),
        ));
        (registry, dispatcher)
    }

    #[test]
    fn modified_file_triggers_reload_and_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"v1").unwrap();
        let (registry, dispatcher) = setup(dir.path());
        let id = registry.register("a.png", AssetType::Texture);
        dispatcher
            .submit_blocking(
                id,
                PathBuf::from("a.png"),
                AssetType::Texture,
                LoadPriority::Normal,
                crate::id::QualityLevel::High,
            )
            .unwrap();
        let version_before = registry.get(id).unwrap().asset().version();

        fs::write(dir.path().join("a.png"), b"v2-longer").unwrap();
        let watcher = Box::new(StubWatcher {
            events: StdMutex::new(vec![FileChangeEvent {
                path: PathBuf::from("a.png"),
                kind: ChangeKind::Modified,
                timestamp: SystemTime::now(),
            }]),
        });
        let controller = HotReloadController::new(
            HotReloadConfig {
                debounce: Duration::from_millis(0),
                ..HotReloadConfig::default()
            },
            Arc::clone(&registry),
            dispatcher,
            watcher,
        );
        std::thread::sleep(Duration::from_millis(5));
        controller.tick();

        let stats = controller.stats();
        assert_eq!(stats.successful_reloads.load(Ordering::Relaxed), 1);
        let handle = registry.get(id).unwrap();
        let version_after = handle.asset().version();
        assert!(version_after > version_before);
        let payload = handle.asset().payload(crate::id::QualityLevel::High).unwrap();
        assert_eq!(&*payload.bytes, b"v2-longer".as_slice());
    }

    #[test]
    fn ignored_extension_is_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, dispatcher) = setup(dir.path());
        let watcher = Box::new(StubWatcher {
            events: StdMutex::new(vec![FileChangeEvent {
                path: PathBuf::from("notes.txt"),
                kind: ChangeKind::Modified,
                timestamp: SystemTime::now(),
            }]),
        });
        let controller = HotReloadController::new(
            HotReloadConfig {
                watched_extensions: vec!["png".into()],
                ..HotReloadConfig::default()
            },
            registry,
            dispatcher,
            watcher,
        );
        controller.tick();
        assert_eq!(controller.stats().ignored_events.load(Ordering::Relaxed), 1);
    }
}
