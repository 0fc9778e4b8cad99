mod crc32;
mod disk;
mod memory;

pub use disk::{DiskCache, DiskCacheStats};
pub use memory::{CacheStatistics, EvictionPolicy, MemoryCache};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::compression::Codec;
use crate::error::AssetResult;
use crate::id::{AssetId, AssetType};

#[derive(Debug, Default, Clone, Copy)]
pub struct MultiLevelStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub total_misses: u64,
    pub memory_hit_rate: f64,
    pub disk_files: usize,
    pub disk_size_bytes: u64,
}

impl fmt::Display for MultiLevelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache: memory_hits={} disk_hits={} misses={} memory_hit_rate={:.1}% disk_files={} disk_bytes={}",
            self.memory_hits,
            self.disk_hits,
            self.total_misses,
            self.memory_hit_rate * 100.0,
            self.disk_files,
            self.disk_size_bytes
        )
    }
}

/// Composes a memory cache over a disk cache: read order memory -> disk ->
/// miss. A disk hit promotes to memory; a memory eviction may demote to
/// disk when the asset is marked Cacheable.
pub struct Cache {
    pub memory: MemoryCache,
    pub disk: DiskCache,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    total_misses: AtomicU64,
}

impl Cache {
    pub fn new(memory: MemoryCache, disk: DiskCache) -> Self {
        Cache {
            memory,
            disk,
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            total_misses: AtomicU64::new(0),
        }
    }

    pub fn put(&self, id: AssetId, bytes: &[u8], asset_type: AssetType) -> AssetResult<()> {
        self.memory.put(id, bytes, asset_type)?;
        self.disk.put(id, bytes, asset_type)?;
        Ok(())
    }

    pub fn put_compressed(
        &self,
        id: AssetId,
        compressed: Vec<u8>,
        asset_type: AssetType,
        codec: Codec,
    ) -> AssetResult<()> {
        self.disk.put(id, &compressed, asset_type)?;
        self.memory.put_compressed(id, compressed, asset_type, codec)?;
        Ok(())
    }

    pub fn get(&self, id: AssetId) -> AssetResult<Option<Vec<u8>>> {
        if let Some((bytes, codec)) = self.memory.get(id) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            let decoded = if codec == Codec::None {
                bytes
            } else {
                codec.decompress(&bytes, bytes.len() * 4)?
            };
            return Ok(Some(decoded));
        }
        if let Some(bytes) = self.disk.get(id)? {
            self.disk_hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache: promoting {} from disk to memory", id);
            let _ = self.memory.put(id, &bytes, AssetType::Unknown);
            return Ok(Some(bytes));
        }
        self.total_misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    pub fn get_from_memory(&self, id: AssetId) -> Option<Vec<u8>> {
        self.memory.get(id).map(|(bytes, _)| bytes)
    }

    pub fn get_from_disk(&self, id: AssetId) -> AssetResult<Option<Vec<u8>>> {
        self.disk.get(id)
    }

    pub fn promote_to_memory(&self, id: AssetId, asset_type: AssetType) -> AssetResult<bool> {
        match self.disk.get(id)? {
            Some(bytes) => {
                self.memory.put(id, &bytes, asset_type)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn demote_to_disk(&self, id: AssetId, asset_type: AssetType) -> AssetResult<bool> {
        match self.memory.get(id) {
            Some((bytes, codec)) => {
                let decoded = if codec == Codec::None {
                    bytes
                } else {
                    codec.decompress(&bytes, 0)?
                };
                self.disk.put(id, &decoded, asset_type)?;
                self.memory.remove(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn has(&self, id: AssetId) -> bool {
        self.memory.has(id) || self.disk.has(id)
    }

    /// Invalidates an entry at both levels. Used when a hot-reloaded
    /// source file changes: the spec's explicit fix for the source
    /// project's gap where stale memory entries outlived a disk refresh.
    pub fn invalidate(&self, id: AssetId) -> AssetResult<()> {
        self.memory.remove(id);
        self.disk.remove(id)?;
        Ok(())
    }

    pub fn clear(&self) -> AssetResult<()> {
        self.memory.clear();
        self.disk.clear()
    }

    /// Promotes a priority asset list into the memory cache ahead of need.
    pub fn warm(&self, ids: &[AssetId]) {
        self.memory.warm(ids, |id| match self.disk.get(id) {
            Ok(Some(bytes)) => Some((bytes, AssetType::Unknown)),
            _ => None,
        });
    }

    pub fn combined_statistics(&self) -> AssetResult<MultiLevelStats> {
        let disk_stats = self.disk.statistics()?;
        Ok(MultiLevelStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            total_misses: self.total_misses.load(Ordering::Relaxed),
            memory_hit_rate: self.memory.stats.hit_rate(),
            disk_files: disk_stats.total_files,
            disk_size_bytes: disk_stats.total_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache(dir: &std::path::Path) -> Cache {
        Cache::new(
            MemoryCache::new(1024 * 1024, EvictionPolicy::Lru),
            DiskCache::new(dir).unwrap(),
        )
    }

    #[test]
    fn read_order_is_memory_then_disk_then_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path());
        assert!(cache.get(AssetId(1)).unwrap().is_none());
        cache.put(AssetId(1), b"bytes", AssetType::Texture).unwrap();
        let got = cache.get(AssetId(1)).unwrap();
        assert_eq!(got, Some(b"bytes".to_vec()));
    }

    #[test]
    fn disk_hit_promotes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path());
        cache.disk.put(AssetId(2), b"ondisk", AssetType::Texture).unwrap();
        assert!(!cache.memory.has(AssetId(2)));
        let got = cache.get(AssetId(2)).unwrap();
        assert_eq!(got, Some(b"ondisk".to_vec()));
        assert!(cache.memory.has(AssetId(2)));
    }

    #[test]
    fn invalidate_clears_both_levels() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path());
        cache.put(AssetId(3), b"stale", AssetType::Texture).unwrap();
        cache.invalidate(AssetId(3)).unwrap();
        assert!(!cache.has(AssetId(3)));
    }
}
