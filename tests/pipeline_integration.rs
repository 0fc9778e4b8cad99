use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asset_pipeline_core::cache::{Cache, DiskCache, EvictionPolicy, MemoryCache};
use asset_pipeline_core::config::AssetManagerConfig;
use asset_pipeline_core::dispatcher::{Dispatcher, LoadPriority};
use asset_pipeline_core::hot_reload::{ChangeKind, ChangeWatcher, FileChangeEvent, HotReloadConfig, HotReloadController};
use asset_pipeline_core::id::{AssetType, QualityLevel};
use asset_pipeline_core::manager::AssetManager;
use asset_pipeline_core::processor::{AssetProcessor, ProcessedMetadata, ProcessingOptions, ProcessingResult, ProcessorPipeline};
use asset_pipeline_core::registry::Registry;
use asset_pipeline_core::source::{LocalFileSource, SourceChain};
use asset_pipeline_core::streaming::{LodTable, StreamingController, StreamingPriority};

fn manager_config(dir: &std::path::Path) -> AssetManagerConfig {
    AssetManagerConfig {
        asset_root_path: dir.to_path_buf(),
        disk_cache_dir: dir.join("cache"),
        max_memory_mb: 64,
        cache_size_mb: 16,
        worker_threads: 2,
        enable_hot_reload: false,
        enable_compression: true,
        enable_streaming: true,
        enable_memory_mapping: false,
    }
}

#[test]
fn load_then_unload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("wall.png"), b"pixels").unwrap();
    let manager = AssetManager::new(manager_config(dir.path())).unwrap();

    let handle = manager.load("wall.png", AssetType::Texture).unwrap();
    assert!(handle.is_loaded());
    let id = handle.id();
    drop(handle);

    manager.unload(id).unwrap();
    assert!(!manager.is_loaded(id));
}

#[test]
fn second_load_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("wall.png"), b"pixels").unwrap();
    let manager = AssetManager::new(manager_config(dir.path())).unwrap();

    let first = manager.load("wall.png", AssetType::Texture).unwrap();
    let id = first.id();
    drop(first);
    manager.unload(id).unwrap();

    manager.load("wall.png", AssetType::Texture).unwrap();
    let stats = manager.cache_statistics().unwrap();
    assert!(stats.memory_hits + stats.disk_hits >= 1);
}

struct StubWatcher {
    events: Mutex<Vec<FileChangeEvent>>,
}

impl ChangeWatcher for StubWatcher {
    fn poll(&self) -> Vec<FileChangeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

fn wire_components(dir: &std::path::Path) -> (Arc<Registry>, Arc<Dispatcher>) {
    let registry = Arc::new(Registry::new());
    let cache = Arc::new(Cache::new(
        MemoryCache::new(1024 * 1024, EvictionPolicy::Lru),
        DiskCache::new(dir.join("cache")).unwrap(),
    ));
    let mut chain = SourceChain::new();
    chain.register(0, Box::new(LocalFileSource::new(dir)));
    let dispatcher = Arc::new(Dispatcher::new(
        2,
        Arc::clone(&registry),
        cache,
        Arc::new(chain),
        Arc::new(ProcessorPipeline::new()),
    ));
    (registry, dispatcher)
}

#[test]
fn dependency_cascade_reloads_dependents_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.mat"), b"base-v1").unwrap();
    fs::write(dir.path().join("derived.mat"), b"derived-v1").unwrap();
    let (registry, dispatcher) = wire_components(dir.path());

    let base = registry.register("base.mat", AssetType::Material);
    let derived = registry.register("derived.mat", AssetType::Material);
    registry.add_dependency(derived, base).unwrap();

    dispatcher
        .submit_blocking(base, PathBuf::from("base.mat"), AssetType::Material, LoadPriority::Normal, QualityLevel::High)
        .unwrap();
    dispatcher
        .submit_blocking(derived, PathBuf::from("derived.mat"), AssetType::Material, LoadPriority::Normal, QualityLevel::High)
        .unwrap();

    fs::write(dir.path().join("base.mat"), b"base-v2-longer").unwrap();
    let watcher = Box::new(StubWatcher {
        events: Mutex::new(vec![FileChangeEvent {
            path: PathBuf::from("base.mat"),
            kind: ChangeKind::Modified,
            timestamp: std::time::SystemTime::now(),
        }]),
    });
    let controller = HotReloadController::new(
        HotReloadConfig { debounce: Duration::from_millis(0), ..HotReloadConfig::default() },
        Arc::clone(&registry),
        dispatcher,
        watcher,
    );
    std::thread::sleep(Duration::from_millis(5));
    controller.tick();

    assert_eq!(controller.stats().successful_reloads.load(Ordering::Relaxed), 2);
    let base_handle = registry.get(base).unwrap();
    assert!(base_handle.is_loaded());
    assert!(registry.get(derived).unwrap().is_loaded());

    let reloaded = base_handle.asset().payload(QualityLevel::High).unwrap();
    assert_eq!(&*reloaded.bytes, b"base-v2-longer".as_slice());
}

#[test]
fn failed_reload_restores_previous_payload() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("shader.glsl"), b"v1-shader-source").unwrap();
    let (registry, dispatcher) = wire_components(dir.path());
    let id = registry.register("shader.glsl", AssetType::Shader);
    dispatcher
        .submit_blocking(id, PathBuf::from("shader.glsl"), AssetType::Shader, LoadPriority::Normal, QualityLevel::High)
        .unwrap();
    let version_before = registry.get(id).unwrap().asset().version();

    // Source file removed before the debounced reload fires: the dispatcher
    // will fail to read it and the controller must restore the prior bytes.
    fs::remove_file(dir.path().join("shader.glsl")).unwrap();
    let watcher = Box::new(StubWatcher {
        events: Mutex::new(vec![FileChangeEvent {
            path: PathBuf::from("shader.glsl"),
            kind: ChangeKind::Modified,
            timestamp: std::time::SystemTime::now(),
        }]),
    });
    let controller = HotReloadController::new(
        HotReloadConfig { debounce: Duration::from_millis(0), ..HotReloadConfig::default() },
        Arc::clone(&registry),
        dispatcher,
        watcher,
    );
    std::thread::sleep(Duration::from_millis(5));
    controller.tick();

    assert_eq!(controller.stats().failed_reloads.load(Ordering::Relaxed), 1);
    let handle = registry.get(id).unwrap();
    assert!(handle.is_loaded());
    assert_eq!(handle.asset().version(), version_before);
}

#[test]
fn streaming_hysteresis_avoids_thrash_at_lod_boundary() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("rock.mesh"), b"mesh-bytes").unwrap();
    let (registry, dispatcher) = wire_components(dir.path());
    let id = registry.register("rock.mesh", AssetType::Mesh);
    dispatcher
        .submit_blocking(id, PathBuf::from("rock.mesh"), AssetType::Mesh, LoadPriority::Normal, QualityLevel::Medium)
        .unwrap();

    let streaming = StreamingController::new(Arc::clone(&registry), Arc::clone(&dispatcher), LodTable::default());

    // High's boundary sits at distance 25; without hysteresis a naive
    // nearest-tier lookup would swing between Medium and High as the
    // camera distance jitters across it.
    for distance in [24.0_f32, 26.0, 24.0, 26.0] {
        streaming.track(id, distance, StreamingPriority::Nearby);
        streaming.update(0.016);
    }

    let (.., upgrades, _) = streaming.statistics();
    assert_eq!(upgrades, 0, "distance jitter around the boundary must not trigger an upgrade");
    assert_eq!(registry.get(id).unwrap().asset().metadata().current_quality, QualityLevel::Medium);
}

struct SlowPassthrough {
    delay: Duration,
}

impl AssetProcessor for SlowPassthrough {
    fn supported_extensions(&self) -> &[&str] {
        &["blk"]
    }

    fn process(&self, input_bytes: &[u8], _options: &ProcessingOptions) -> asset_pipeline_core::AssetResult<ProcessingResult> {
        std::thread::sleep(self.delay);
        Ok(ProcessingResult {
            success: true,
            error_message: None,
            output_bytes: input_bytes.to_vec(),
            output_metadata: ProcessedMetadata::default(),
            processing_info: std::collections::HashMap::new(),
            processing_time: self.delay,
        })
    }
}

#[test]
fn priority_queue_serves_critical_requests_before_low() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("blocker.blk"), b"occupy-the-worker").unwrap();
    fs::write(dir.path().join("low.png"), b"low").unwrap();
    fs::write(dir.path().join("critical.png"), b"critical").unwrap();

    let registry = Arc::new(Registry::new());
    let cache = Arc::new(Cache::new(
        MemoryCache::new(1024 * 1024, EvictionPolicy::Lru),
        DiskCache::new(dir.path().join("cache")).unwrap(),
    ));
    let mut chain = SourceChain::new();
    chain.register(0, Box::new(LocalFileSource::new(dir.path())));
    let pipeline = Arc::new(ProcessorPipeline::new());
    pipeline.register(AssetType::Binary, Box::new(SlowPassthrough { delay: Duration::from_millis(80) }));

    // Single worker: the blocker keeps it busy long enough for both
    // low and critical to land in the queue before either is popped.
    let dispatcher = Arc::new(Dispatcher::new(1, Arc::clone(&registry), cache, Arc::new(chain), pipeline));

    let blocker_id = registry.register("blocker.blk", AssetType::Binary);
    let low_id = registry.register("low.png", AssetType::Texture);
    let critical_id = registry.register("critical.png", AssetType::Texture);

    let _blocker_waiter = dispatcher.submit(blocker_id, PathBuf::from("blocker.blk"), AssetType::Binary, LoadPriority::Normal, QualityLevel::High);
    std::thread::sleep(Duration::from_millis(10));
    let low_waiter = dispatcher.submit(low_id, PathBuf::from("low.png"), AssetType::Texture, LoadPriority::Low, QualityLevel::High);
    let critical_waiter = dispatcher.submit(
        critical_id,
        PathBuf::from("critical.png"),
        AssetType::Texture,
        LoadPriority::Critical,
        QualityLevel::High,
    );

    let completion_order = Arc::new(Mutex::new(Vec::new()));
    let low_order = Arc::clone(&completion_order);
    let low_thread = std::thread::spawn(move || {
        low_waiter.recv().unwrap().unwrap();
        low_order.lock().unwrap().push("low");
    });
    let critical_order = Arc::clone(&completion_order);
    let critical_thread = std::thread::spawn(move || {
        critical_waiter.recv().unwrap().unwrap();
        critical_order.lock().unwrap().push("critical");
    });
    low_thread.join().unwrap();
    critical_thread.join().unwrap();

    assert_eq!(*completion_order.lock().unwrap(), vec!["critical", "low"]);
}

#[test]
fn concurrent_duplicate_requests_coalesce_into_one_process_call() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("shared.wav"), b"shared-audio-bytes").unwrap();
    let (registry, dispatcher) = wire_components(dir.path());
    let id = registry.register("shared.wav", AssetType::Audio);

    let waiters: Vec<_> = (0..20)
        .map(|_| {
            dispatcher.submit(id, PathBuf::from("shared.wav"), AssetType::Audio, LoadPriority::Normal, QualityLevel::High)
        })
        .collect();

    let counter = Arc::new(AtomicUsize::new(0));
    for waiter in waiters {
        let handle = waiter.recv().unwrap().unwrap();
        assert_eq!(handle.id(), id);
        counter.fetch_add(1, Ordering::Relaxed);
    }
    assert_eq!(counter.load(Ordering::Relaxed), 20);
}
