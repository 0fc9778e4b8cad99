use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::cache::{Cache, DiskCache, EvictionPolicy, MemoryCache};
use crate::config::AssetManagerConfig;
use crate::dispatcher::{Dispatcher, LoadPriority, LoadWaiter};
use crate::error::{AssetError, AssetResult};
use crate::handle::AssetHandle;
use crate::hot_reload::{ChangeWatcher, HotReloadConfig, HotReloadController, NotifyWatcher};
use crate::id::{AssetId, AssetType, QualityLevel};
use crate::logging::{PerformanceMetrics, PipelineLogger};
use crate::processor::{AssetProcessor, ProcessorPipeline};
use crate::registry::Registry;
use crate::source::{FileSource, LocalFileSource, SourceChain};
use crate::streaming::{LodTable, StreamingController, StreamingPriority};

/// Aggregate counters surfaced by [`AssetManager::statistics`].
#[derive(Debug, Default)]
struct ManagerStats {
    loads_requested: AtomicU64,
    loads_succeeded: AtomicU64,
    loads_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_load_time_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerStatistics {
    pub loads_requested: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_load_time_ms: f64,
    pub memory_usage_bytes: u64,
    pub asset_count: usize,
}

/// Front door of the asset pipeline: wires registry, cache, source chain,
/// processor pipeline and dispatcher together, and optionally a hot-reload
/// watcher and a streaming/LOD controller. Most callers only ever touch
/// this type; the component modules underneath are public for composition
/// in hosts that want a different wiring.
pub struct AssetManager {
    config: AssetManagerConfig,
    registry: Arc<Registry>,
    cache: Arc<Cache>,
    sources: Arc<SourceChain>,
    pipeline: Arc<ProcessorPipeline>,
    dispatcher: Arc<Dispatcher>,
    hot_reload: Option<Arc<HotReloadController>>,
    streaming: Option<Arc<StreamingController>>,
    logger: Option<Arc<PipelineLogger>>,
    stats: ManagerStats,
}

impl AssetManager {
    pub fn new(config: AssetManagerConfig) -> AssetResult<Self> {
        Self::with_logger(config, None)
    }

    pub fn with_logger(config: AssetManagerConfig, logger: Option<Arc<PipelineLogger>>) -> AssetResult<Self> {
        let registry = Arc::new(Registry::new());

        let memory_cache = MemoryCache::new(config.cache_size_mb * 1024 * 1024, EvictionPolicy::Lru);
        let disk_cache = DiskCache::new(&config.disk_cache_dir)?;
        let cache = Arc::new(Cache::new(memory_cache, disk_cache));

        let mut chain = SourceChain::new();
        chain.register(0, Box::new(LocalFileSource::new(&config.asset_root_path)) as Box<dyn FileSource>);
        let sources = Arc::new(chain);

        let pipeline = Arc::new(ProcessorPipeline::new());

        let dispatcher = Arc::new(Dispatcher::new(
            config.worker_threads,
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&sources),
            Arc::clone(&pipeline),
        ));

        let hot_reload = if config.enable_hot_reload {
            match NotifyWatcher::new(&config.asset_root_path) {
                Ok(watcher) => {
                    let controller = Arc::new(HotReloadController::new(
                        HotReloadConfig::default(),
                        Arc::clone(&registry),
                        Arc::clone(&dispatcher),
                        Box::new(watcher) as Box<dyn ChangeWatcher>,
                    ));
                    controller.start();
                    Some(controller)
                }
                Err(err) => {
                    warn!("hot reload disabled: failed to watch '{}': {}", config.asset_root_path.display(), err);
                    None
                }
            }
        } else {
            None
        };

        let streaming = if config.enable_streaming {
            let controller = Arc::new(StreamingController::new(
                Arc::clone(&registry),
                Arc::clone(&dispatcher),
                LodTable::default(),
            ));
            controller.set_worker_thread_count(config.worker_threads);
            Some(controller)
        } else {
            None
        };

        info!(
            "asset manager started: root='{}', workers={}, hot_reload={}, streaming={}",
            config.asset_root_path.display(),
            config.worker_threads,
            hot_reload.is_some(),
            streaming.is_some(),
        );

        Ok(AssetManager {
            config,
            registry,
            cache,
            sources,
            pipeline,
            dispatcher,
            hot_reload,
            streaming,
            logger,
            stats: ManagerStats::default(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn streaming(&self) -> Option<&Arc<StreamingController>> {
        self.streaming.as_ref()
    }

    pub fn hot_reload(&self) -> Option<&Arc<HotReloadController>> {
        self.hot_reload.as_ref()
    }

    /// Registers a path with the given type (idempotent) and blocks until
    /// the requested quality tier is resident.
    pub fn load(&self, path: &str, asset_type: AssetType) -> AssetResult<AssetHandle> {
        self.load_with_quality(path, asset_type, QualityLevel::High, LoadPriority::Normal)
    }

    pub fn load_with_quality(
        &self,
        path: &str,
        asset_type: AssetType,
        quality: QualityLevel,
        priority: LoadPriority,
    ) -> AssetResult<AssetHandle> {
        let id = self.registry.register(path, asset_type);
        let started = Instant::now();
        self.stats.loads_requested.fetch_add(1, Ordering::Relaxed);

        let was_cached = self.cache.has(crate::id::asset_id_from_path(format!("{}::{}", id.0, quality)));

        let result = self.dispatcher.submit_blocking(
            id,
            PathBuf::from(path),
            asset_type,
            priority,
            quality,
        );

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => {
                self.stats.loads_succeeded.fetch_add(1, Ordering::Relaxed);
                if was_cached {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                self.stats.loads_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats.total_load_time_ms.fetch_add(elapsed_ms as u64, Ordering::Relaxed);

        if let Some(logger) = &self.logger {
            logger.log_performance(PerformanceMetrics {
                load_time_ms: elapsed_ms,
                loads_per_sec: if elapsed_ms > 0.0 { 1000.0 / elapsed_ms } else { 0.0 },
                memory_usage: self.memory_usage(),
                pending_requests: self.dispatcher.pending_count() as u32,
                cache_hits: self.stats.cache_hits.load(Ordering::Relaxed) as u32,
                cache_misses: self.stats.cache_misses.load(Ordering::Relaxed) as u32,
                active_workers: self.config.worker_threads as u32,
                timestamp: chrono::Utc::now(),
            });
        }

        result
    }

    /// Non-blocking submission; the returned receiver yields once when the
    /// (possibly shared) load completes.
    pub fn load_async(&self, path: &str, asset_type: AssetType) -> LoadWaiter {
        let id = self.registry.register(path, asset_type);
        self.stats.loads_requested.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.submit(
            id,
            PathBuf::from(path),
            asset_type,
            LoadPriority::Normal,
            QualityLevel::High,
        )
    }

    /// Submits the load and invokes `callback` from whichever thread
    /// observes completion first — typically a dispatcher worker thread.
    pub fn load_with_callback<F>(&self, path: &str, asset_type: AssetType, callback: F)
    where
        F: FnOnce(AssetResult<AssetHandle>) + Send + 'static,
    {
        let waiter = self.load_async(path, asset_type);
        std::thread::spawn(move || {
            if let Ok(result) = waiter.recv() {
                callback(result);
            }
        });
    }

    /// Submits every path and blocks until all complete, preserving order.
    pub fn load_batch(&self, requests: &[(&str, AssetType)]) -> Vec<AssetResult<AssetHandle>> {
        let waiters: Vec<LoadWaiter> = requests
            .iter()
            .map(|(path, asset_type)| self.load_async(path, *asset_type))
            .collect();
        waiters
            .into_iter()
            .map(|waiter| waiter.recv().map_err(|_| AssetError::Internal("load waiter disconnected".into()))?)
            .collect()
    }

    pub fn get(&self, id: AssetId) -> Option<AssetHandle> {
        self.registry.get(id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<AssetHandle> {
        self.registry.find_by_path(path)
    }

    pub fn is_loaded(&self, id: AssetId) -> bool {
        self.registry
            .get(id)
            .map(|h| h.is_loaded())
            .unwrap_or(false)
    }

    /// Drops resident payloads for an asset with no outstanding handles.
    /// Returns `WrongState` if the asset is still referenced.
    pub fn unload(&self, id: AssetId) -> AssetResult<()> {
        let asset = self.registry.raw_asset(id)?;
        if asset.ref_count() > 0 {
            return Err(AssetError::WrongState {
                id: id.0,
                expected: "ref_count == 0".into(),
                actual: format!("ref_count == {}", asset.ref_count()),
            });
        }
        for quality in asset.installed_qualities() {
            asset.drop_payload(quality);
        }
        self.registry.set_state(id, crate::id::AssetState::Unloaded)?;
        Ok(())
    }

    /// Forces a synchronous reload from source, bypassing the cache.
    pub fn reload(&self, id: AssetId) -> AssetResult<AssetHandle> {
        let meta = self.registry.get_metadata(id)?;
        self.dispatcher.invalidate_cache_entry(id, meta.current_quality)?;
        self.registry.mark_stale(id)?;
        self.dispatcher.submit_blocking(
            id,
            PathBuf::from(&meta.path),
            meta.asset_type,
            LoadPriority::High,
            meta.current_quality,
        )
    }

    /// Drops every asset with a zero reference count and no `PERSISTENT`
    /// flag. Returns the ids collected.
    pub fn gc(&self) -> Vec<AssetId> {
        self.registry.gc()
    }

    /// Alias for `gc`, named after the spec's unload-on-demand operation.
    pub fn free_unused(&self) -> Vec<AssetId> {
        self.gc()
    }

    pub fn memory_usage(&self) -> u64 {
        self.registry.memory_usage()
    }

    pub fn asset_count(&self) -> usize {
        self.registry.asset_count()
    }

    pub fn register_factory(&self, asset_type: AssetType, factory: Box<dyn AssetProcessor>) {
        self.pipeline.register(asset_type, factory);
    }

    pub fn unregister_factory(&self, asset_type: AssetType) {
        self.pipeline.unregister(asset_type);
    }

    pub fn track_for_streaming(&self, id: AssetId, distance: f32, priority: StreamingPriority) {
        if let Some(streaming) = &self.streaming {
            streaming.track(id, distance, priority);
        }
    }

    pub fn update_streaming(&self, dt: f32) {
        if let Some(streaming) = &self.streaming {
            streaming.update(dt);
        }
    }

    pub fn statistics(&self) -> ManagerStatistics {
        let requested = self.stats.loads_requested.load(Ordering::Relaxed);
        let avg_load_time_ms = if requested > 0 {
            self.stats.total_load_time_ms.load(Ordering::Relaxed) as f64 / requested as f64
        } else {
            0.0
        };
        ManagerStatistics {
            loads_requested: requested,
            loads_succeeded: self.stats.loads_succeeded.load(Ordering::Relaxed),
            loads_failed: self.stats.loads_failed.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            avg_load_time_ms,
            memory_usage_bytes: self.memory_usage(),
            asset_count: self.asset_count(),
        }
    }

    pub fn cache_statistics(&self) -> AssetResult<crate::cache::MultiLevelStats> {
        self.cache.combined_statistics()
    }

    /// One-line operator-facing summary of cache state.
    pub fn cache_report(&self) -> AssetResult<String> {
        Ok(self.cache.combined_statistics()?.to_string())
    }

    /// One-line operator-facing summary of streaming/LOD state, if enabled.
    pub fn streaming_report(&self) -> Option<String> {
        self.streaming.as_ref().map(|s| s.report().to_string())
    }

    /// One-line operator-facing summary of hot-reload watcher state, if enabled.
    pub fn hot_reload_report(&self) -> Option<String> {
        self.hot_reload.as_ref().map(|h| h.report().to_string())
    }

    pub fn shutdown(&self) {
        if let Some(hot_reload) = &self.hot_reload {
            hot_reload.stop();
        }
        self.dispatcher.shutdown();
    }
}

impl Drop for AssetManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config(dir: &std::path::Path) -> AssetManagerConfig {
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
    fn load_then_get_returns_loaded_handle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"pixels").unwrap();
        let manager = AssetManager::new(test_config(dir.path())).unwrap();

        let handle = manager.load("a.png", AssetType::Texture).unwrap();
        assert!(handle.is_loaded());
        assert!(manager.is_loaded(handle.id()));
    }

    #[test]
    fn unload_requires_zero_ref_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"pixels").unwrap();
        let manager = AssetManager::new(test_config(dir.path())).unwrap();

        let handle = manager.load("a.png", AssetType::Texture).unwrap();
        let id = handle.id();
        assert!(manager.unload(id).is_err());
        drop(handle);
        assert!(manager.unload(id).is_ok());
        assert!(!manager.is_loaded(id));
    }

    #[test]
    fn load_batch_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"one").unwrap();
        fs::write(dir.path().join("b.png"), b"two").unwrap();
        let manager = AssetManager::new(test_config(dir.path())).unwrap();

        let results = manager.load_batch(&[("a.png", AssetType::Texture), ("b.png", AssetType::Texture)]);
        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap().id() != results[1].as_ref().unwrap().id());
    }

    #[test]
    fn statistics_track_requested_and_succeeded_loads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"pixels").unwrap();
        let manager = AssetManager::new(test_config(dir.path())).unwrap();
        manager.load("a.png", AssetType::Texture).unwrap();

        let stats = manager.statistics();
        assert_eq!(stats.loads_requested, 1);
        assert_eq!(stats.loads_succeeded, 1);
    }

    #[test]
    fn gc_collects_unreferenced_assets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"pixels").unwrap();
        let manager = AssetManager::new(test_config(dir.path())).unwrap();
        let handle = manager.load("a.png", AssetType::Texture).unwrap();
        let id = handle.id();
        assert!(manager.gc().is_empty());
        drop(handle);
        assert_eq!(manager.gc(), vec![id]);
    }
}
