use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Stable 64-bit identifier for an asset, derived from its logical path.
///
/// `asset_id_from_path` is pure and deterministic (FNV-1a 64) so identical
/// paths across processes produce identical ids. Zero is reserved invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl AssetId {
    pub const INVALID: AssetId = AssetId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a 64 over a path normalized with forward slashes, so the same asset
/// resolves to the same id regardless of host path separator conventions.
pub fn asset_id_from_path<P: AsRef<Path>>(path: P) -> AssetId {
    let normalized = path.as_ref().to_string_lossy().replace('\\', "/");
    let mut hash = FNV_OFFSET_BASIS;
    for byte in normalized.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash == 0 {
        hash = 1;
    }
    AssetId(hash)
}

/// Closed set of recognized asset categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Texture,
    Mesh,
    Material,
    Shader,
    Audio,
    Animation,
    Font,
    Scene,
    Script,
    Config,
    Binary,
    Unknown,
}

impl AssetType {
    pub fn from_extension(ext: &str) -> AssetType {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "bmp" | "tga" | "dds" | "ktx" | "hdr" | "exr" => {
                AssetType::Texture
            }
            "obj" | "fbx" | "gltf" | "glb" | "dae" | "3ds" | "ply" => AssetType::Mesh,
            "mat" | "material" => AssetType::Material,
            "glsl" | "hlsl" | "vert" | "frag" | "comp" | "spv" => AssetType::Shader,
            "wav" | "mp3" | "ogg" | "flac" | "aac" => AssetType::Audio,
            "anim" | "animation" => AssetType::Animation,
            "ttf" | "otf" | "woff" | "woff2" => AssetType::Font,
            "scene" => AssetType::Scene,
            "lua" | "py" | "js" | "wasm" => AssetType::Script,
            "json" | "xml" | "yaml" | "yml" | "ini" | "toml" => AssetType::Config,
            "bin" | "dat" => AssetType::Binary,
            _ => AssetType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::Texture => "texture",
            AssetType::Mesh => "mesh",
            AssetType::Material => "material",
            AssetType::Shader => "shader",
            AssetType::Audio => "audio",
            AssetType::Animation => "animation",
            AssetType::Font => "font",
            AssetType::Scene => "scene",
            AssetType::Script => "script",
            AssetType::Config => "config",
            AssetType::Binary => "binary",
            AssetType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a resident asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetState {
    Unloaded,
    Queued,
    Loading,
    Loaded,
    Streaming,
    Stale,
    Error,
}

impl AssetState {
    /// States from which `install` is permitted to transition to `Loaded`.
    pub fn can_install_from(self) -> bool {
        matches!(self, AssetState::Unloaded | AssetState::Queued | AssetState::Loading)
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetState::Unloaded => "Unloaded",
            AssetState::Queued => "Queued",
            AssetState::Loading => "Loading",
            AssetState::Loaded => "Loaded",
            AssetState::Streaming => "Streaming",
            AssetState::Stale => "Stale",
            AssetState::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

/// Ordered quality tier. Each tier has an independently resident payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityLevel {
    pub const ALL: [QualityLevel; 4] = [
        QualityLevel::Low,
        QualityLevel::Medium,
        QualityLevel::High,
        QualityLevel::Ultra,
    ];
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
            QualityLevel::Ultra => "ultra",
        };
        write!(f, "{}", s)
    }
}

/// Recognized load hints. "Persistent" forbids automatic eviction;
/// "Preload" biases initial scheduling; the rest are honored per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFlags(u32);

impl LoadFlags {
    pub const ASYNC: LoadFlags = LoadFlags(1 << 0);
    pub const STREAMING: LoadFlags = LoadFlags(1 << 1);
    pub const COMPRESSED: LoadFlags = LoadFlags(1 << 2);
    pub const CACHEABLE: LoadFlags = LoadFlags(1 << 3);
    pub const HOT_RELOAD: LoadFlags = LoadFlags(1 << 4);
    pub const PRELOAD: LoadFlags = LoadFlags(1 << 5);
    pub const PERSISTENT: LoadFlags = LoadFlags(1 << 6);
    pub const HIGH_PRIORITY: LoadFlags = LoadFlags(1 << 7);
    pub const USE_MEMORY_MAP: LoadFlags = LoadFlags(1 << 8);
    pub const NONE: LoadFlags = LoadFlags(0);

    pub fn contains(self, other: LoadFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: LoadFlags) {
        self.0 |= other.0;
    }

    pub fn unset(&mut self, other: LoadFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for LoadFlags {
    type Output = LoadFlags;
    fn bitor(self, rhs: LoadFlags) -> LoadFlags {
        LoadFlags(self.0 | rhs.0)
    }
}

impl Default for LoadFlags {
    fn default() -> Self {
        LoadFlags::CACHEABLE
    }
}
