use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use dashmap::DashMap;
use log::{info, warn};

use crate::cache::Cache;
use crate::error::{AssetError, AssetResult, RetryPolicy};
use crate::handle::{AssetHandle, Payload};
use crate::id::{AssetId, AssetType, QualityLevel};
use crate::processor::{ProcessingOptions, ProcessorPipeline};
use crate::registry::Registry;
use crate::source::SourceChain;

/// Ordering: higher first, then earlier `request_time` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadPriority {
    Low,
    Normal,
    High,
    Critical,
}

type Promise = crossbeam_channel::Sender<AssetResult<AssetHandle>>;
pub type LoadWaiter = crossbeam_channel::Receiver<AssetResult<AssetHandle>>;

struct QueueEntry {
    priority: LoadPriority,
    request_time: u64,
    id: AssetId,
    path: PathBuf,
    asset_type: AssetType,
    quality: QualityLevel,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.request_time == other.request_time
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: higher priority, then earlier request
        // time, should compare greater so it pops first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.request_time.cmp(&self.request_time))
    }
}

struct SharedQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    condvar: Condvar,
}

type InFlightKey = (AssetId, QualityLevel);

/// Priority-ordered worker pool feeding the cache/source/processor chain.
/// Duplicate in-flight requests for the same `(id, quality)` are coalesced:
/// the first caller's execution publishes its result to every waiter.
pub struct Dispatcher {
    queue: Arc<SharedQueue>,
    in_flight: Arc<DashMap<InFlightKey, Vec<Promise>>>,
    shutdown: Arc<AtomicBool>,
    seq: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<Registry>,
    cache: Arc<Cache>,
    sources: Arc<SourceChain>,
    pipeline: Arc<ProcessorPipeline>,
}

struct WorkerContext {
    queue: Arc<SharedQueue>,
    in_flight: Arc<DashMap<InFlightKey, Vec<Promise>>>,
    shutdown: Arc<AtomicBool>,
    registry: Arc<Registry>,
    cache: Arc<Cache>,
    sources: Arc<SourceChain>,
    pipeline: Arc<ProcessorPipeline>,
}

impl Dispatcher {
    pub fn new(
        worker_count: usize,
        registry: Arc<Registry>,
        cache: Arc<Cache>,
        sources: Arc<SourceChain>,
        pipeline: Arc<ProcessorPipeline>,
    ) -> Self {
        let dispatcher = Dispatcher {
            queue: Arc::new(SharedQueue {
                heap: Mutex::new(BinaryHeap::new()),
                condvar: Condvar::new(),
            }),
            in_flight: Arc::new(DashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            seq: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
            registry,
            cache,
            sources,
            pipeline,
        };
        dispatcher.spawn_workers(worker_count.max(1));
        dispatcher
    }

    fn spawn_workers(&self, count: usize) {
        let mut workers = self.workers.lock().unwrap();
        for i in 0..count {
            let ctx = WorkerContext {
                queue: Arc::clone(&self.queue),
                in_flight: Arc::clone(&self.in_flight),
                shutdown: Arc::clone(&self.shutdown),
                registry: Arc::clone(&self.registry),
                cache: Arc::clone(&self.cache),
                sources: Arc::clone(&self.sources),
                pipeline: Arc::clone(&self.pipeline),
            };
            let handle = std::thread::Builder::new()
                .name(format!("asset-worker-{}", i))
                .spawn(move || worker_loop(ctx))
                .expect("failed to spawn asset worker thread");
            workers.push(handle);
        }
        info!("dispatcher started {} worker threads", count);
    }

    /// Submits a load request, coalescing with any in-flight request for
    /// the same `(id, quality)`. Returns a receiver that yields exactly
    /// once, when the (possibly shared) execution completes.
    pub fn submit(
        &self,
        id: AssetId,
        path: PathBuf,
        asset_type: AssetType,
        priority: LoadPriority,
        quality: QualityLevel,
    ) -> LoadWaiter {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let key = (id, quality);

        let mut already_in_flight = false;
        self.in_flight
            .entry(key)
            .and_modify(|senders| {
                senders.push(tx.clone());
                already_in_flight = true;
            })
            .or_insert_with(|| vec![tx]);

        if !already_in_flight {
            let request_time = self.seq.fetch_add(1, Ordering::Relaxed);
            let mut heap = self.queue.heap.lock().unwrap();
            heap.push(QueueEntry {
                priority,
                request_time,
                id,
                path,
                asset_type,
                quality,
            });
            self.queue.condvar.notify_one();
        }
        rx
    }

    /// Blocking convenience wrapper over `submit`.
    pub fn submit_blocking(
        &self,
        id: AssetId,
        path: PathBuf,
        asset_type: AssetType,
        priority: LoadPriority,
        quality: QualityLevel,
    ) -> AssetResult<AssetHandle> {
        let waiter = self.submit(id, path, asset_type, priority, quality);
        waiter
            .recv()
            .map_err(|_| AssetError::Cancelled { id: id.0 })?
    }

    /// Drops the cached bytes for `(id, quality)` so the next submitted
    /// load re-reads and re-processes the source instead of returning a
    /// stale byte-cache hit. Callers that reload a changed source must
    /// invalidate before resubmitting.
    pub fn invalidate_cache_entry(&self, id: AssetId, quality: QualityLevel) -> AssetResult<()> {
        self.cache.invalidate(content_cache_key(id, quality))
    }

    /// Stops accepting new work conceptually (workers drain pending items
    /// and stop once the queue reports empty), joins workers with no
    /// additional grace period beyond their natural drain.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.condvar.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.heap.lock().unwrap().len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(ctx: WorkerContext) {
    loop {
        let entry = {
            let mut heap = ctx.queue.heap.lock().unwrap();
            loop {
                if let Some(entry) = heap.pop() {
                    break Some(entry);
                }
                if ctx.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                let (guard, timeout) = ctx
                    .queue
                    .condvar
                    .wait_timeout(heap, std::time::Duration::from_millis(200))
                    .unwrap();
                heap = guard;
                if timeout.timed_out() && ctx.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
            }
        };

        let entry = match entry {
            Some(e) => e,
            None => return,
        };

        let key = (entry.id, entry.quality);
        let result = load_internal(
            &ctx.registry,
            &ctx.cache,
            &ctx.sources,
            &ctx.pipeline,
            entry.id,
            &entry.path,
            entry.asset_type,
            entry.quality,
        );

        if let Some((_, senders)) = ctx.in_flight.remove(&key) {
            for sender in senders {
                let _ = sender.send(clone_result(&result));
            }
        }
    }
}

fn clone_result(result: &AssetResult<AssetHandle>) -> AssetResult<AssetHandle> {
    match result {
        Ok(handle) => Ok(handle.clone()),
        Err(err) => Err(err.clone()),
    }
}

/// Derived content-key for the two-level byte cache: distinct from the
/// processor pipeline's own sha256(input)+options cache (§4.F), this one
/// only needs to distinguish `(asset, quality)` pairs since a reload must
/// invalidate the entry before re-filling it (see `Dispatcher::invalidate_cache_entry`).
pub(crate) fn content_cache_key(id: AssetId, quality: QualityLevel) -> AssetId {
    crate::id::asset_id_from_path(format!("{}::{}", id.0, quality))
}

fn load_internal(
    registry: &Registry,
    cache: &Cache,
    sources: &SourceChain,
    pipeline: &ProcessorPipeline,
    id: AssetId,
    path: &std::path::Path,
    asset_type: AssetType,
    quality: QualityLevel,
) -> AssetResult<AssetHandle> {
    // Step 1: dependencies are loaded (or acceptably streaming) first.
    for dep in registry.dependencies_of(id) {
        let dep_loaded = registry
            .get(dep)
            .map(|h| h.is_loaded())
            .unwrap_or(false);
        if !dep_loaded {
            let dep_meta = registry.get_metadata(dep)?;
            load_internal(
                registry,
                cache,
                sources,
                pipeline,
                dep,
                std::path::Path::new(&dep_meta.path),
                dep_meta.asset_type,
                quality,
            )?;
        }
    }

    registry.set_state(id, crate::id::AssetState::Loading)?;

    let cache_key = content_cache_key(id, quality);
    let bytes = load_bytes_with_retry(registry, cache, sources, pipeline, id, cache_key, path, asset_type, quality)?;

    registry.install(id, quality, Payload::new(bytes))?;
    registry.bump_version(id)?;

    registry.get(id).ok_or(AssetError::NotFound {
        path: path.to_path_buf(),
    })
}

/// Reads and processes a source into bytes, retrying recoverable errors
/// (`ChecksumMismatch`, transient `IoError`) with exponential backoff up to
/// the cap `AssetError::retry_policy` reports. Non-recoverable errors
/// (`DecodeError`, registry errors) surface on the first attempt.
fn load_bytes_with_retry(
    registry: &Registry,
    cache: &Cache,
    sources: &SourceChain,
    pipeline: &ProcessorPipeline,
    id: AssetId,
    cache_key: AssetId,
    path: &std::path::Path,
    asset_type: AssetType,
    quality: QualityLevel,
) -> AssetResult<Vec<u8>> {
    let mut attempt = 0u32;
    loop {
        match load_bytes_once(registry, cache, sources, pipeline, id, cache_key, path, asset_type, quality) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => {
                let RetryPolicy::ExponentialBackoff { max_attempts } = err.retry_policy() else {
                    return Err(err);
                };
                attempt += 1;
                if attempt > max_attempts {
                    warn!("load of '{}' exhausted {} retries: {}", path.display(), max_attempts, err);
                    return Err(err);
                }
                let delay = std::time::Duration::from_millis(25 * (1u64 << (attempt - 1)));
                warn!(
                    "retrying load of '{}' after {:?} (attempt {}/{}): {}",
                    path.display(),
                    delay,
                    attempt,
                    max_attempts,
                    err
                );
                std::thread::sleep(delay);
            }
        }
    }
}

fn load_bytes_once(
    registry: &Registry,
    cache: &Cache,
    sources: &SourceChain,
    pipeline: &ProcessorPipeline,
    id: AssetId,
    cache_key: AssetId,
    path: &std::path::Path,
    asset_type: AssetType,
    quality: QualityLevel,
) -> AssetResult<Vec<u8>> {
    if let Some(bytes) = cache.get(cache_key)? {
        return Ok(bytes);
    }

    let input = sources.read_all(path)?;
    let options = ProcessingOptions {
        quality,
        ..ProcessingOptions::default()
    };
    let result = pipeline.process(&path.to_string_lossy(), asset_type, &input, &options)?;
    if !result.success {
        let message = result
            .error_message
            .unwrap_or_else(|| "processing failed".into());
        warn!("processing failed for asset {}: {}", id, message);
        registry.set_error(id, message.clone())?;
        return Err(AssetError::DecodeError {
            path: path.to_path_buf(),
            reason: message,
        });
    }
    cache.put(cache_key, &result.output_bytes, asset_type)?;
    Ok(result.output_bytes)
}
