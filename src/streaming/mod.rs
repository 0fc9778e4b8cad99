pub mod predictive;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::debug;

use crate::dispatcher::{Dispatcher, LoadPriority};
use crate::id::{AssetId, QualityLevel};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamingPriority {
    Preload = 100,
    Distant = 200,
    Background = 400,
    Nearby = 600,
    Visible = 800,
    Critical = 1000,
}

impl StreamingPriority {
    fn as_load_priority(self) -> LoadPriority {
        match self {
            StreamingPriority::Preload | StreamingPriority::Distant => LoadPriority::Low,
            StreamingPriority::Background => LoadPriority::Normal,
            StreamingPriority::Nearby | StreamingPriority::Visible => LoadPriority::High,
            StreamingPriority::Critical => LoadPriority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LodLevel {
    pub quality: QualityLevel,
    pub max_distance: f32,
    pub screen_size_threshold: f32,
}

/// Ordered LOD table plus per-asset hysteresis state, so distance jitter
/// around a boundary does not cause repeated upgrade/downgrade churn.
#[derive(Debug, Clone)]
pub struct LodTable {
    levels: Vec<LodLevel>,
    pub hysteresis_factor: f32,
}

impl Default for LodTable {
    fn default() -> Self {
        LodTable {
            levels: vec![
                LodLevel { quality: QualityLevel::Ultra, max_distance: 10.0, screen_size_threshold: 1.0 },
                LodLevel { quality: QualityLevel::High, max_distance: 25.0, screen_size_threshold: 0.5 },
                LodLevel { quality: QualityLevel::Medium, max_distance: 50.0, screen_size_threshold: 0.25 },
                LodLevel { quality: QualityLevel::Low, max_distance: 100.0, screen_size_threshold: 0.1 },
            ],
            hysteresis_factor: 0.1,
        }
    }
}

impl LodTable {
    pub fn new(levels: Vec<LodLevel>, hysteresis_factor: f32) -> Self {
        let mut levels = levels;
        levels.sort_by(|a, b| a.max_distance.partial_cmp(&b.max_distance).unwrap());
        LodTable { levels, hysteresis_factor }
    }

    /// Smallest quality tier whose `max_distance` still covers `distance`.
    pub fn select_quality_for_distance(&self, distance: f32) -> QualityLevel {
        self.levels
            .iter()
            .find(|l| distance <= l.max_distance)
            .map(|l| l.quality)
            .unwrap_or_else(|| self.levels.last().map(|l| l.quality).unwrap_or(QualityLevel::Low))
    }

    /// Largest quality tier whose `screen_size_threshold` is still met.
    pub fn select_quality_for_screen(&self, screen_size: f32) -> QualityLevel {
        self.levels
            .iter()
            .filter(|l| screen_size >= l.screen_size_threshold)
            .map(|l| l.quality)
            .max()
            .unwrap_or(QualityLevel::Low)
    }

    fn max_distance_for(&self, quality: QualityLevel) -> Option<f32> {
        self.levels.iter().find(|l| l.quality == quality).map(|l| l.max_distance)
    }

    /// Applies the symmetric hysteresis band around `current`'s boundary:
    /// upgrading requires distance below `max_distance * (1 - h)`,
    /// downgrading requires distance above `max_distance * (1 + h)`.
    pub fn target_quality(&self, distance: f32, current: QualityLevel) -> QualityLevel {
        let raw_target = self.select_quality_for_distance(distance);
        if raw_target == current {
            return current;
        }
        if raw_target > current {
            if let Some(max_dist) = self.max_distance_for(raw_target) {
                if distance <= max_dist * (1.0 - self.hysteresis_factor) {
                    return raw_target;
                }
            }
            current
        } else {
            if let Some(max_dist) = self.max_distance_for(current) {
                if distance > max_dist * (1.0 + self.hysteresis_factor) {
                    return raw_target;
                }
            }
            current
        }
    }
}

/// Per-frame budget for streaming work: memory, bandwidth and time are
/// each tracked against a configured ceiling and reset once per frame.
pub struct BudgetManager {
    memory_budget_bytes: AtomicU64,
    bandwidth_budget_bps: AtomicU64,
    time_budget_ms: AtomicU64,
    memory_used: AtomicU64,
    bandwidth_used: AtomicU64,
    time_used_ms: AtomicU64,
}

impl Default for BudgetManager {
    fn default() -> Self {
        BudgetManager {
            memory_budget_bytes: AtomicU64::new(256 * 1024 * 1024),
            bandwidth_budget_bps: AtomicU64::new(10 * 1024 * 1024),
            time_budget_ms: AtomicU64::new(2),
            memory_used: AtomicU64::new(0),
            bandwidth_used: AtomicU64::new(0),
            time_used_ms: AtomicU64::new(0),
        }
    }
}

impl BudgetManager {
    pub fn set_memory_budget_bytes(&self, bytes: u64) {
        self.memory_budget_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_bandwidth_budget_bps(&self, bytes_per_sec: u64) {
        self.bandwidth_budget_bps.store(bytes_per_sec, Ordering::Relaxed);
    }

    pub fn set_time_budget_ms(&self, ms: u64) {
        self.time_budget_ms.store(ms, Ordering::Relaxed);
    }

    pub fn can_afford(&self, estimated_bytes: u64, estimated_time_ms: u64) -> bool {
        let mem_ok = self.memory_used.load(Ordering::Relaxed) + estimated_bytes
            <= self.memory_budget_bytes.load(Ordering::Relaxed);
        let time_ok = self.time_used_ms.load(Ordering::Relaxed) + estimated_time_ms
            <= self.time_budget_ms.load(Ordering::Relaxed);
        mem_ok && time_ok
    }

    pub fn consume(&self, bytes: u64, time_ms: u64) {
        self.memory_used.fetch_add(bytes, Ordering::Relaxed);
        self.bandwidth_used.fetch_add(bytes, Ordering::Relaxed);
        self.time_used_ms.fetch_add(time_ms, Ordering::Relaxed);
    }

    /// Called exactly once per frame boundary by the host.
    pub fn reset_frame_budget(&self) {
        self.memory_used.store(0, Ordering::Relaxed);
        self.bandwidth_used.store(0, Ordering::Relaxed);
        self.time_used_ms.store(0, Ordering::Relaxed);
    }

    pub fn memory_utilization(&self) -> f64 {
        let budget = self.memory_budget_bytes.load(Ordering::Relaxed);
        if budget == 0 {
            return 0.0;
        }
        self.memory_used.load(Ordering::Relaxed) as f64 / budget as f64
    }
}

#[derive(Debug, Clone)]
struct StreamingRecord {
    id: AssetId,
    target_quality: QualityLevel,
    current_quality: QualityLevel,
    priority: StreamingPriority,
    distance: f32,
    request_time: Instant,
}

#[derive(Debug, Default)]
pub struct StreamingStatistics {
    pub requests_processed: AtomicU64,
    pub bytes_streamed: AtomicU64,
    pub quality_upgrades: AtomicU64,
    pub quality_downgrades: AtomicU64,
}

/// Per-frame LOD/streaming control loop: tracks per-asset distance and
/// drives upgrade/downgrade requests through the load dispatcher under a
/// [`BudgetManager`] ceiling. High-water eviction trims Loaded assets with
/// no outstanding handles when memory pressure crosses the watermark.
pub struct StreamingController {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    lod: LodTable,
    budget: BudgetManager,
    records: Mutex<HashMap<AssetId, StreamingRecord>>,
    stats: StreamingStatistics,
    high_watermark: f64,
    low_watermark: f64,
    active_worker_count: AtomicUsize,
}

impl StreamingController {
    pub fn new(registry: Arc<Registry>, dispatcher: Arc<Dispatcher>, lod: LodTable) -> Self {
        StreamingController {
            registry,
            dispatcher,
            lod,
            budget: BudgetManager::default(),
            records: Mutex::new(HashMap::new()),
            stats: StreamingStatistics::default(),
            high_watermark: 0.9,
            low_watermark: 0.75,
            active_worker_count: AtomicUsize::new(4),
        }
    }

    pub fn budget(&self) -> &BudgetManager {
        &self.budget
    }

    pub fn set_worker_thread_count(&self, count: usize) {
        self.active_worker_count.store(count.max(1), Ordering::Relaxed);
    }

    pub fn worker_thread_count(&self) -> usize {
        self.active_worker_count.load(Ordering::Relaxed)
    }

    pub fn track(&self, id: AssetId, distance: f32, priority: StreamingPriority) {
        let current_quality = self
            .registry
            .get(id)
            .map(|h| h.asset().metadata().current_quality)
            .unwrap_or(QualityLevel::Low);
        let mut records = self.records.lock().unwrap();
        records
            .entry(id)
            .and_modify(|r| {
                r.distance = distance;
                r.priority = priority;
            })
            .or_insert(StreamingRecord {
                id,
                target_quality: current_quality,
                current_quality,
                priority,
                distance,
                request_time: Instant::now(),
            });
    }

    pub fn untrack(&self, id: AssetId) {
        self.records.lock().unwrap().remove(&id);
    }

    /// One control-loop tick. `dt` is unused by the current LOD model but
    /// kept in the signature for predictive-streamer composition and to
    /// mirror the host's per-frame update contract.
    pub fn update(&self, _dt: f32) {
        let mut to_upgrade = Vec::new();
        {
            let mut records = self.records.lock().unwrap();
            for record in records.values_mut() {
                let target = self.lod.target_quality(record.distance, record.current_quality);
                record.target_quality = target;
                if target > record.current_quality {
                    to_upgrade.push((record.id, target, record.priority));
                }
            }
        }

        for (id, target, priority) in to_upgrade {
            let meta = match self.registry.get_metadata(id) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let estimated_bytes = meta.size_bytes.max(1);
            if !self.budget.can_afford(estimated_bytes, 1) {
                continue;
            }
            let result = self.dispatcher.submit_blocking(
                id,
                std::path::PathBuf::from(&meta.path),
                meta.asset_type,
                priority.as_load_priority(),
                target,
            );
            if let Ok(handle) = result {
                self.budget.consume(estimated_bytes, 1);
                self.stats.requests_processed.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_streamed.fetch_add(estimated_bytes, Ordering::Relaxed);
                self.stats.quality_upgrades.fetch_add(1, Ordering::Relaxed);
                let mut records = self.records.lock().unwrap();
                if let Some(record) = records.get_mut(&id) {
                    record.current_quality = target;
                }
                drop(handle);
            }
        }

        if self.budget.memory_utilization() > self.high_watermark {
            self.evict_until_low_watermark();
        }
    }

    fn evict_until_low_watermark(&self) {
        let mut candidates: Vec<AssetId> = self.registry.unreferenced_set();
        candidates.sort_unstable_by_key(|id| id.0);
        for id in candidates {
            if self.budget.memory_utilization() <= self.low_watermark {
                break;
            }
            if let Ok(asset) = self.registry.raw_asset(id) {
                let qualities = asset.installed_qualities();
                if let Some(&highest) = qualities.last() {
                    asset.drop_payload(highest);
                    self.stats.quality_downgrades.fetch_add(1, Ordering::Relaxed);
                    debug!("streaming: downgraded {} under memory pressure", id);
                }
            }
        }
    }

    pub fn statistics(&self) -> (u64, u64, u64, u64) {
        (
            self.stats.requests_processed.load(Ordering::Relaxed),
            self.stats.bytes_streamed.load(Ordering::Relaxed),
            self.stats.quality_upgrades.load(Ordering::Relaxed),
            self.stats.quality_downgrades.load(Ordering::Relaxed),
        )
    }

    /// Debug snapshot of the streaming controller's current state.
    pub fn report(&self) -> StreamingReport {
        let (requests_processed, bytes_streamed, quality_upgrades, quality_downgrades) = self.statistics();
        StreamingReport {
            tracked_assets: self.records.lock().unwrap().len(),
            requests_processed,
            bytes_streamed,
            quality_upgrades,
            quality_downgrades,
            memory_utilization: self.budget.memory_utilization(),
            worker_threads: self.worker_thread_count(),
        }
    }
}

/// Human-readable dump of [`StreamingController`] state, for operator
/// tooling rather than per-frame logging.
#[derive(Debug, Clone, Copy)]
pub struct StreamingReport {
    pub tracked_assets: usize,
    pub requests_processed: u64,
    pub bytes_streamed: u64,
    pub quality_upgrades: u64,
    pub quality_downgrades: u64,
    pub memory_utilization: f64,
    pub worker_threads: usize,
}

impl fmt::Display for StreamingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "streaming: tracked={} requests={} bytes_streamed={} upgrades={} downgrades={} mem_util={:.1}% workers={}",
            self.tracked_assets,
            self.requests_processed,
            self.bytes_streamed,
            self.quality_upgrades,
            self.quality_downgrades,
            self.memory_utilization * 100.0,
            self.worker_threads
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_selects_smallest_covering_quality() {
        let table = LodTable::default();
        assert_eq!(table.select_quality_for_distance(5.0), QualityLevel::Ultra);
        assert_eq!(table.select_quality_for_distance(30.0), QualityLevel::Medium);
        assert_eq!(table.select_quality_for_distance(500.0), QualityLevel::Low);
    }

    #[test]
    fn screen_size_selects_largest_satisfied_quality() {
        let table = LodTable::default();
        assert_eq!(table.select_quality_for_screen(0.9), QualityLevel::High);
        assert_eq!(table.select_quality_for_screen(0.05), QualityLevel::Low);
    }

    #[test]
    fn hysteresis_prevents_thrashing_at_the_boundary() {
        let table = LodTable::default();
        // High's max_distance is 25; without hysteresis 25.5 would downgrade
        // and 24.5 would upgrade on every frame of jitter around the line.
        let at_25_5 = table.target_quality(25.5, QualityLevel::High);
        assert_eq!(at_25_5, QualityLevel::High);
        let at_28 = table.target_quality(28.0, QualityLevel::High);
        assert_eq!(at_28, QualityLevel::Medium);
    }

    #[test]
    fn budget_manager_blocks_requests_once_memory_is_exhausted() {
        let budget = BudgetManager::default();
        budget.set_memory_budget_bytes(100);
        assert!(budget.can_afford(50, 0));
        budget.consume(50, 0);
        assert!(budget.can_afford(50, 0));
        budget.consume(50, 0);
        assert!(!budget.can_afford(1, 0));
        budget.reset_frame_budget();
        assert!(budget.can_afford(100, 0));
    }
}
