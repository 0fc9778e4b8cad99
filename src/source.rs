use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use memmap2::Mmap;

use crate::error::{AssetError, AssetResult};

/// A read-only memory mapping of a source file, unmapped when dropped.
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Abstracts bytes-from-path so the dispatcher never depends on where an
/// asset actually lives (local disk today; memory-mapped or networked
/// sources implement the same trait).
pub trait FileSource: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn size(&self, path: &Path) -> AssetResult<u64>;
    fn mtime(&self, path: &Path) -> AssetResult<SystemTime>;
    fn read_all(&self, path: &Path) -> AssetResult<Vec<u8>>;
    fn map(&self, _path: &Path) -> AssetResult<MappedFile> {
        Err(AssetError::Internal("memory mapping not supported by this source".into()))
    }
}

/// Local filesystem source rooted at a base directory.
pub struct LocalFileSource {
    root: PathBuf,
}

impl LocalFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileSource { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSource for LocalFileSource {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn size(&self, path: &Path) -> AssetResult<u64> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full).map_err(|e| io_err(&full, e))?;
        Ok(meta.len())
    }

    fn mtime(&self, path: &Path) -> AssetResult<SystemTime> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full).map_err(|e| io_err(&full, e))?;
        meta.modified().map_err(|e| io_err(&full, e))
    }

    fn read_all(&self, path: &Path) -> AssetResult<Vec<u8>> {
        let full = self.resolve(path);
        if !full.is_file() {
            return Err(AssetError::NotFound { path: full });
        }
        fs::read(&full).map_err(|e| io_err(&full, e))
    }

    fn map(&self, path: &Path) -> AssetResult<MappedFile> {
        let full = self.resolve(path);
        let file = fs::File::open(&full).map_err(|e| io_err(&full, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| io_err(&full, e))?;
        Ok(MappedFile { mmap })
    }
}

fn io_err(path: &Path, err: std::io::Error) -> AssetError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AssetError::NotFound { path: path.to_path_buf() }
    } else if err.kind() == std::io::ErrorKind::PermissionDenied {
        AssetError::IoError {
            path: Some(path.to_path_buf()),
            reason: "permission denied".into(),
        }
    } else {
        AssetError::IoError {
            path: Some(path.to_path_buf()),
            reason: err.to_string(),
        }
    }
}

/// One entry in a priority-ordered multi-source chain.
struct PrioritizedSource {
    priority: i32,
    source: Box<dyn FileSource>,
}

/// Dispatches to the highest-priority registered source that claims to have
/// the requested path.
#[derive(Default)]
pub struct SourceChain {
    sources: Vec<PrioritizedSource>,
}

impl SourceChain {
    pub fn new() -> Self {
        SourceChain { sources: Vec::new() }
    }

    pub fn register(&mut self, priority: i32, source: Box<dyn FileSource>) {
        self.sources.push(PrioritizedSource { priority, source });
        self.sources.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn pick(&self, path: &Path) -> AssetResult<&dyn FileSource> {
        self.sources
            .iter()
            .find(|s| s.source.exists(path))
            .map(|s| s.source.as_ref())
            .ok_or_else(|| AssetError::NotFound { path: path.to_path_buf() })
    }

    pub fn read_all(&self, path: &Path) -> AssetResult<Vec<u8>> {
        self.pick(path)?.read_all(path)
    }

    pub fn mtime(&self, path: &Path) -> AssetResult<SystemTime> {
        self.pick(path)?.mtime(path)
    }

    pub fn size(&self, path: &Path) -> AssetResult<u64> {
        self.pick(path)?.size(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.sources.iter().any(|s| s.source.exists(path))
    }
}
