use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::cache::crc32::crc32;
use crate::error::{AssetError, AssetResult};
use crate::id::{AssetId, AssetType};

const META_MAGIC: &[u8; 4] = b"AMET";
const META_VERSION: u32 = 1;
const META_LEN: usize = 4 + 4 + 8 + 4 + 8 + 8 + 4;

struct MetaRecord {
    id: AssetId,
    asset_type: AssetType,
    size: u64,
    creation_time_nanos: i64,
    checksum: u32,
}

fn type_to_u32(t: AssetType) -> u32 {
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

fn u32_to_type(v: u32) -> AssetType {
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

fn encode_meta(meta: &MetaRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(META_LEN);
    out.extend_from_slice(META_MAGIC);
    out.extend_from_slice(&META_VERSION.to_le_bytes());
    out.extend_from_slice(&meta.id.0.to_le_bytes());
    out.extend_from_slice(&type_to_u32(meta.asset_type).to_le_bytes());
    out.extend_from_slice(&meta.size.to_le_bytes());
    out.extend_from_slice(&meta.creation_time_nanos.to_le_bytes());
    out.extend_from_slice(&meta.checksum.to_le_bytes());
    out
}

fn decode_meta(bytes: &[u8]) -> AssetResult<MetaRecord> {
    if bytes.len() < META_LEN || &bytes[0..4] != META_MAGIC {
        return Err(AssetError::Internal("corrupt cache sidecar header".into()));
    }
    let id = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let asset_type = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let size = u64::from_le_bytes(bytes[20..28].try_into().unwrap());
    let creation_time_nanos = i64::from_le_bytes(bytes[28..36].try_into().unwrap());
    let checksum = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
    Ok(MetaRecord {
        id: AssetId(id),
        asset_type: u32_to_type(asset_type),
        size,
        creation_time_nanos,
        checksum,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskCacheStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub corrupted_files: usize,
}

/// Content-addressed on-disk cache. Each entry is `<id_hex>.bin` plus a
/// `<id_hex>.meta` sidecar carrying the spec's fixed binary header.
pub struct DiskCache {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> AssetResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DiskCache {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn bin_path(&self, id: AssetId) -> PathBuf {
        self.dir.join(format!("{:016x}.bin", id.0))
    }

    fn meta_path(&self, id: AssetId) -> PathBuf {
        self.dir.join(format!("{:016x}.meta", id.0))
    }

    /// Writes bytes and sidecar atomically (temp file + rename).
    pub fn put(&self, id: AssetId, bytes: &[u8], asset_type: AssetType) -> AssetResult<()> {
        let _guard = self.write_lock.lock();
        let bin_path = self.bin_path(id);
        let tmp_bin = self.dir.join(format!("{:016x}.bin.tmp", id.0));
        fs::write(&tmp_bin, bytes)?;
        fs::rename(&tmp_bin, &bin_path)?;

        let checksum = crc32(bytes);
        let creation_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        let meta = MetaRecord {
            id,
            asset_type,
            size: bytes.len() as u64,
            creation_time_nanos: creation_nanos,
            checksum,
        };
        let meta_path = self.meta_path(id);
        let tmp_meta = self.dir.join(format!("{:016x}.meta.tmp", id.0));
        fs::write(&tmp_meta, encode_meta(&meta))?;
        fs::rename(&tmp_meta, &meta_path)?;
        Ok(())
    }

    /// Verifies the CRC32 checksum; on mismatch the entry is deleted and
    /// treated as a miss rather than returning corrupt bytes.
    pub fn get(&self, id: AssetId) -> AssetResult<Option<Vec<u8>>> {
        let meta_path = self.meta_path(id);
        let bin_path = self.bin_path(id);
        if !meta_path.is_file() || !bin_path.is_file() {
            return Ok(None);
        }
        let meta_bytes = fs::read(&meta_path)?;
        let meta = decode_meta(&meta_bytes)?;
        let data = fs::read(&bin_path)?;
        if crc32(&data) != meta.checksum {
            self.remove(id)?;
            return Err(AssetError::ChecksumMismatch { path: bin_path });
        }
        Ok(Some(data))
    }

    pub fn has(&self, id: AssetId) -> bool {
        self.bin_path(id).is_file() && self.meta_path(id).is_file()
    }

    pub fn remove(&self, id: AssetId) -> AssetResult<bool> {
        let _guard = self.write_lock.lock();
        let mut removed = false;
        if self.bin_path(id).is_file() {
            fs::remove_file(self.bin_path(id))?;
            removed = true;
        }
        if self.meta_path(id).is_file() {
            fs::remove_file(self.meta_path(id))?;
            removed = true;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> AssetResult<()> {
        let _guard = self.write_lock.lock();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            fs::remove_file(entry.path())?;
        }
        Ok(())
    }

    pub fn cleanup_old_files(&self, max_age: Duration) -> AssetResult<usize> {
        let mut removed = 0;
        let now = SystemTime::now();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if now.duration_since(modified).unwrap_or_default() > max_age {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(id) = u64::from_str_radix(stem, 16) {
                        if self.remove(AssetId(id))?  {
                            removed += 1;
                        }
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Reports checksum failures and orphan `.bin`/`.meta` pairs.
    pub fn validate(&self) -> AssetResult<Vec<AssetId>> {
        let mut corrupted = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            let id = match u64::from_str_radix(stem, 16) {
                Ok(v) => AssetId(v),
                Err(_) => continue,
            };
            if !self.bin_path(id).is_file() {
                corrupted.push(id);
                continue;
            }
            match self.get(id) {
                Ok(_) => {}
                Err(AssetError::ChecksumMismatch { .. }) => corrupted.push(id),
                Err(_) => corrupted.push(id),
            }
        }
        Ok(corrupted)
    }

    pub fn statistics(&self) -> AssetResult<DiskCacheStats> {
        let mut stats = DiskCacheStats::default();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                stats.total_files += 1;
                stats.total_size_bytes += entry.metadata()?.len();
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let id = AssetId(9);
        cache.put(id, b"disk bytes", AssetType::Texture).unwrap();
        let got = cache.get(id).unwrap();
        assert_eq!(got, Some(b"disk bytes".to_vec()));
    }

    #[test]
    fn checksum_mismatch_deletes_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let id = AssetId(3);
        cache.put(id, b"original", AssetType::Texture).unwrap();
        fs::write(dir.path().join(format!("{:016x}.bin", id.0)), b"corrupted!").unwrap();
        let err = cache.get(id).unwrap_err();
        assert!(matches!(err, AssetError::ChecksumMismatch { .. }));
        assert!(!cache.has(id));
    }

    #[test]
    fn missing_entry_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        assert_eq!(cache.get(AssetId(123)).unwrap(), None);
    }
}
