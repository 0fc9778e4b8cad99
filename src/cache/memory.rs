use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::compression::Codec;
use crate::error::{AssetError, AssetResult};
use crate::id::{AssetId, AssetType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    Random,
    LargestFirst,
}

#[derive(Default)]
pub struct CacheStatistics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub insertions: AtomicU64,
    pub bytes_stored: AtomicU64,
    pub bytes_evicted: AtomicU64,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.insertions.store(0, Ordering::Relaxed);
        self.bytes_stored.store(0, Ordering::Relaxed);
        self.bytes_evicted.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone)]
struct Entry {
    bytes: Vec<u8>,
    size: usize,
    asset_type: AssetType,
    codec: Codec,
    last_access: Instant,
    creation_time: Instant,
    access_count: u32,
    insertion_seq: u64,
}

/// Snapshot row persisted by `save_snapshot` / restored by `load_snapshot`.
/// Codec tag is recorded but payload bytes are always stored decompressed
/// in the snapshot, for simplicity on reload.
#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    id: u64,
    asset_type: u8,
    bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

fn type_tag(t: AssetType) -> u8 {
    match t {
        AssetType::Texture => 0,
        AssetType::Mesh => 1,
        AssetType::Material => 2,
        AssetType::Shader => 3,
        AssetType::Audio => 4,
        AssetType::Animation => 5,
        AssetType::Font => 6,
        AssetType::Scene => 7,
        AssetType::Script => 8,
        AssetType::Config => 9,
        AssetType::Binary => 10,
        AssetType::Unknown => 11,
    }
}

fn tag_type(v: u8) -> AssetType {
    match v {
        0 => AssetType::Texture,
        1 => AssetType::Mesh,
        2 => AssetType::Material,
        3 => AssetType::Shader,
        4 => AssetType::Audio,
        5 => AssetType::Animation,
        6 => AssetType::Font,
        7 => AssetType::Scene,
        8 => AssetType::Script,
        9 => AssetType::Config,
        10 => AssetType::Binary,
        _ => AssetType::Unknown,
    }
}

struct State {
    entries: HashMap<AssetId, Entry>,
    current_size: usize,
    next_seq: u64,
}

/// Size-bounded in-memory cache with a pluggable eviction policy.
pub struct MemoryCache {
    state: RwLock<State>,
    max_size: AtomicU64,
    policy: RwLock<EvictionPolicy>,
    pub stats: CacheStatistics,
}

impl MemoryCache {
    pub fn new(max_size_bytes: u64, policy: EvictionPolicy) -> Self {
        MemoryCache {
            state: RwLock::new(State {
                entries: HashMap::new(),
                current_size: 0,
                next_seq: 0,
            }),
            max_size: AtomicU64::new(max_size_bytes),
            policy: RwLock::new(policy),
            stats: CacheStatistics::default(),
        }
    }

    pub fn set_max_size(&self, max_size_bytes: u64) {
        self.max_size.store(max_size_bytes, Ordering::Relaxed);
    }

    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Relaxed)
    }

    pub fn current_size(&self) -> u64 {
        self.state.read().current_size as u64
    }

    pub fn entry_count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn set_eviction_policy(&self, policy: EvictionPolicy) {
        *self.policy.write() = policy;
    }

    pub fn put(&self, id: AssetId, bytes: &[u8], asset_type: AssetType) -> AssetResult<()> {
        self.put_with_codec(id, bytes.to_vec(), asset_type, Codec::None)
    }

    pub fn put_compressed(
        &self,
        id: AssetId,
        compressed_bytes: Vec<u8>,
        asset_type: AssetType,
        codec: Codec,
    ) -> AssetResult<()> {
        self.put_with_codec(id, compressed_bytes, asset_type, codec)
    }

    fn put_with_codec(
        &self,
        id: AssetId,
        bytes: Vec<u8>,
        asset_type: AssetType,
        codec: Codec,
    ) -> AssetResult<()> {
        let incoming_size = bytes.len();
        let limit = self.max_size() as usize;
        if incoming_size > limit {
            return Err(AssetError::TooLarge {
                size: incoming_size as u64,
                limit: limit as u64,
            });
        }

        let mut state = self.state.write();
        if let Some(old) = state.entries.remove(&id) {
            state.current_size -= old.size;
        }
        self.evict_if_needed(&mut state, incoming_size, limit);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.current_size += incoming_size;
        state.entries.insert(
            id,
            Entry {
                bytes,
                size: incoming_size,
                asset_type,
                codec,
                last_access: Instant::now(),
                creation_time: Instant::now(),
                access_count: 1,
                insertion_seq: seq,
            },
        );
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_stored
            .fetch_add(incoming_size as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, id: AssetId) -> Option<(Vec<u8>, Codec)> {
        let mut state = self.state.write();
        if let Some(entry) = state.entries.get_mut(&id) {
            entry.last_access = Instant::now();
            entry.access_count += 1;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some((entry.bytes.clone(), entry.codec))
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn has(&self, id: AssetId) -> bool {
        self.state.read().entries.contains_key(&id)
    }

    pub fn remove(&self, id: AssetId) -> bool {
        let mut state = self.state.write();
        if let Some(entry) = state.entries.remove(&id) {
            state.current_size -= entry.size;
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.current_size = 0;
    }

    pub fn trim_to_size(&self, target_size: u64) {
        let mut state = self.state.write();
        let target = target_size as usize;
        while state.current_size > target {
            if !self.evict_one(&mut state) {
                break;
            }
        }
    }

    /// Bulk-promotes the given ids' bytes into this cache ahead of need.
    /// Ids with no source bytes are skipped silently.
    pub fn warm<F>(&self, ids: &[AssetId], mut fetch: F)
    where
        F: FnMut(AssetId) -> Option<(Vec<u8>, AssetType)>,
    {
        for &id in ids {
            if self.has(id) {
                continue;
            }
            if let Some((bytes, asset_type)) = fetch(id) {
                let _ = self.put(id, &bytes, asset_type);
            }
        }
    }

    fn evict_if_needed(&self, state: &mut State, incoming_size: usize, limit: usize) {
        while state.current_size + incoming_size > limit {
            if !self.evict_one(state) {
                break;
            }
        }
    }

    fn evict_one(&self, state: &mut State) -> bool {
        let policy = *self.policy.read();
        let candidate = match policy {
            EvictionPolicy::Lru => state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(&id, _)| id),
            EvictionPolicy::Lfu => state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.access_count)
                .map(|(&id, _)| id),
            EvictionPolicy::Fifo => state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.insertion_seq)
                .map(|(&id, _)| id),
            EvictionPolicy::LargestFirst => state
                .entries
                .iter()
                .max_by_key(|(_, e)| e.size)
                .map(|(&id, _)| id),
            EvictionPolicy::Random => state.entries.keys().next().copied(),
        };
        match candidate {
            Some(id) => {
                if let Some(entry) = state.entries.remove(&id) {
                    state.current_size -= entry.size;
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_evicted
                        .fetch_add(entry.size as u64, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    pub fn cached_ids(&self) -> Vec<AssetId> {
        self.state.read().entries.keys().copied().collect()
    }

    /// Writes a binary snapshot (gzip-framed bincode) independent of the
    /// disk cache's content-addressed files, for warming a fresh process.
    pub fn save_snapshot(&self, path: &std::path::Path) -> AssetResult<()> {
        let state = self.state.read();
        let snapshot = Snapshot {
            entries: state
                .entries
                .iter()
                .map(|(id, entry)| SnapshotEntry {
                    id: id.0,
                    asset_type: type_tag(entry.asset_type),
                    bytes: if entry.codec == Codec::None {
                        entry.bytes.clone()
                    } else {
                        entry.codec.decompress(&entry.bytes, entry.size).unwrap_or_default()
                    },
                })
                .collect(),
        };
        let encoded = bincode::serialize(&snapshot)
            .map_err(|e| AssetError::Internal(format!("snapshot encode failed: {}", e)))?;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&encoded)?;
        let framed = encoder
            .finish()
            .map_err(|e| AssetError::Internal(format!("snapshot compress failed: {}", e)))?;
        std::fs::write(path, framed)?;
        Ok(())
    }

    pub fn load_snapshot(&self, path: &std::path::Path) -> AssetResult<()> {
        let framed = std::fs::read(path)?;
        let mut decoder = flate2::read::GzDecoder::new(framed.as_slice());
        let mut encoded = Vec::new();
        decoder.read_to_end(&mut encoded)?;
        let snapshot: Snapshot = bincode::deserialize(&encoded)
            .map_err(|e| AssetError::Internal(format!("snapshot decode failed: {}", e)))?;
        for row in snapshot.entries {
            let _ = self.put(AssetId(row.id), &row.bytes, tag_type(row.asset_type));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_until_removed() {
        let cache = MemoryCache::new(1024, EvictionPolicy::Lru);
        let id = AssetId(1);
        cache.put(id, b"payload", AssetType::Texture).unwrap();
        let (bytes, _) = cache.get(id).unwrap();
        assert_eq!(bytes, b"payload");
        cache.remove(id);
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn put_larger_than_budget_is_rejected() {
        let cache = MemoryCache::new(4, EvictionPolicy::Lru);
        let err = cache.put(AssetId(1), b"12345", AssetType::Texture).unwrap_err();
        assert!(matches!(err, AssetError::TooLarge { .. }));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = MemoryCache::new(10, EvictionPolicy::Lru);
        cache.put(AssetId(1), b"aaaaa", AssetType::Texture).unwrap();
        cache.put(AssetId(2), b"bbbbb", AssetType::Texture).unwrap();
        // touch id 1 so id 2 becomes the least recently used
        cache.get(AssetId(1));
        cache.put(AssetId(3), b"ccccc", AssetType::Texture).unwrap();
        assert!(cache.has(AssetId(1)));
        assert!(!cache.has(AssetId(2)));
        assert!(cache.has(AssetId(3)));
    }

    #[test]
    fn size_used_matches_sum_of_entries() {
        let cache = MemoryCache::new(1024, EvictionPolicy::Lru);
        cache.put(AssetId(1), b"abc", AssetType::Texture).unwrap();
        cache.put(AssetId(2), b"de", AssetType::Texture).unwrap();
        assert_eq!(cache.current_size(), 5);
    }

    #[test]
    fn zero_length_payload_occupies_a_slot_with_no_bytes() {
        let cache = MemoryCache::new(1024, EvictionPolicy::Lru);
        cache.put(AssetId(1), b"", AssetType::Texture).unwrap();
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_a_fresh_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snapshot");
        let cache = MemoryCache::new(1024, EvictionPolicy::Lru);
        cache.put(AssetId(5), b"hello", AssetType::Config).unwrap();
        cache.save_snapshot(&path).unwrap();

        let fresh = MemoryCache::new(1024, EvictionPolicy::Lru);
        fresh.load_snapshot(&path).unwrap();
        let (bytes, _) = fresh.get(AssetId(5)).unwrap();
        assert_eq!(bytes, b"hello");
    }
}
