use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::error::AssetResult;
use crate::id::{AssetType, QualityLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeFor {
    Size,
    Speed,
}

#[derive(Debug, Clone, Default)]
pub struct TextureOptions {
    pub codec: Option<String>,
    pub max_resolution: Option<u32>,
    pub generate_normals: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MeshOptions {
    pub weld: bool,
    pub generate_normals: bool,
    pub smoothing_angle: f32,
    pub target_triangles: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct AudioOptions {
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u16>,
    pub to_mono: bool,
    pub codec_quality: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct TypeSpecificOptions {
    pub texture: Option<TextureOptions>,
    pub mesh: Option<MeshOptions>,
    pub audio: Option<AudioOptions>,
}

#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub quality: QualityLevel,
    pub compress: bool,
    pub generate_mipmaps: bool,
    pub optimize_for: OptimizeFor,
    pub type_specific: TypeSpecificOptions,
    pub custom: HashMap<String, String>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        ProcessingOptions {
            quality: QualityLevel::High,
            compress: true,
            generate_mipmaps: false,
            optimize_for: OptimizeFor::Size,
            type_specific: TypeSpecificOptions::default(),
            custom: HashMap::new(),
        }
    }
}

impl ProcessingOptions {
    /// Canonical string used as part of the processing result cache key —
    /// stable across runs because it only reflects user-visible choices.
    fn cache_fingerprint(&self) -> String {
        format!(
            "{:?}|{}|{}|{:?}|{:?}",
            self.quality, self.compress, self.generate_mipmaps, self.optimize_for, self.custom
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessedMetadata {
    pub dimensions: Option<(u32, u32)>,
    pub sample_rate: Option<u32>,
    pub vertex_count: Option<u32>,
    pub index_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub output_bytes: Vec<u8>,
    pub output_metadata: ProcessedMetadata,
    pub processing_info: HashMap<String, String>,
    pub processing_time: Duration,
}

/// A per-type decode/transcode stage. Concrete file-format decoding
/// (PNG/WAV/OBJ/...) is a collaborator outside this crate; built-in
/// processors here are pass-through, surfacing only the contract.
pub trait AssetProcessor: Send + Sync {
    fn supported_extensions(&self) -> &[&str];
    fn can_process(&self, path: &str) -> bool {
        let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        self.supported_extensions().iter().any(|e| *e == ext)
    }
    fn process(
        &self,
        input_bytes: &[u8],
        options: &ProcessingOptions,
    ) -> AssetResult<ProcessingResult>;
    fn estimate_time(&self, input_size: usize, _options: &ProcessingOptions) -> Duration {
        Duration::from_micros((input_size as u64 / 1024).max(1))
    }
    fn estimate_output_size(&self, input_size: usize, _options: &ProcessingOptions) -> u64 {
        input_size as u64
    }
}

macro_rules! passthrough_processor {
    ($name:ident, $exts:expr) => {
        pub struct $name {
            extensions: &'static [&'static str],
        }

        impl $name {
            pub fn new() -> Self {
                $name { extensions: $exts }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::new()
            }
        }

        impl AssetProcessor for $name {
            fn supported_extensions(&self) -> &[&str] {
                self.extensions
            }

            fn process(
                &self,
                input_bytes: &[u8],
                _options: &ProcessingOptions,
            ) -> AssetResult<ProcessingResult> {
                let start = Instant::now();
                Ok(ProcessingResult {
                    success: true,
                    error_message: None,
                    output_bytes: input_bytes.to_vec(),
                    output_metadata: ProcessedMetadata::default(),
                    processing_info: HashMap::new(),
                    processing_time: start.elapsed(),
                })
            }
        }
    };
}

passthrough_processor!(
    TextureProcessor,
    &["png", "jpg", "jpeg", "bmp", "tga", "dds", "ktx", "hdr", "exr"]
);
passthrough_processor!(AudioProcessor, &["wav", "mp3", "ogg", "flac", "aac"]);
passthrough_processor!(
    ConfigProcessor,
    &["json", "xml", "yaml", "yml", "ini", "toml"]
);
passthrough_processor!(
    SceneProcessor,
    &["scene"]
);
passthrough_processor!(
    MeshProcessor,
    &["obj", "fbx", "gltf", "glb", "dae", "3ds", "ply"]
);
passthrough_processor!(
    ShaderProcessor,
    &["glsl", "hlsl", "vert", "frag", "comp", "spv"]
);

#[derive(Default)]
struct PipelineStats {
    total_processed: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    bytes_processed: AtomicU64,
    total_time_ms: AtomicU64,
}

/// Registry of processors keyed by [`AssetType`], plus a processing-output
/// cache keyed by `(path, sha256(input), options)` so identical inputs
/// under identical options never re-run the processor. Distinct from the
/// asset-bytes cache in `crate::cache` — this caches processor *output*.
pub struct ProcessorPipeline {
    processors: DashMap<AssetType, Box<dyn AssetProcessor>>,
    result_cache: DashMap<String, ProcessingResult>,
    stats: PipelineStats,
}

impl Default for ProcessorPipeline {
    fn default() -> Self {
        ProcessorPipeline::new()
    }
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        let pipeline = ProcessorPipeline {
            processors: DashMap::new(),
            result_cache: DashMap::new(),
            stats: PipelineStats::default(),
        };
        pipeline.register(AssetType::Texture, Box::new(TextureProcessor::new()));
        pipeline.register(AssetType::Audio, Box::new(AudioProcessor::new()));
        pipeline.register(AssetType::Config, Box::new(ConfigProcessor::new()));
        pipeline.register(AssetType::Scene, Box::new(SceneProcessor::new()));
        pipeline.register(AssetType::Mesh, Box::new(MeshProcessor::new()));
        pipeline.register(AssetType::Shader, Box::new(ShaderProcessor::new()));
        pipeline
    }

    /// Registers (or replaces) the processor handling `asset_type`. Safe to
    /// call after the pipeline is shared across worker threads.
    pub fn register(&self, asset_type: AssetType, processor: Box<dyn AssetProcessor>) {
        self.processors.insert(asset_type, processor);
    }

    pub fn unregister(&self, asset_type: AssetType) {
        self.processors.remove(&asset_type);
    }

    fn cache_key(path: &str, input: &[u8], options: &ProcessingOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input);
        let digest = hasher.finalize();
        format!(
            "{}|{:x}|{}",
            path,
            digest,
            options.cache_fingerprint()
        )
    }

    pub fn process(
        &self,
        path: &str,
        asset_type: AssetType,
        input_bytes: &[u8],
        options: &ProcessingOptions,
    ) -> AssetResult<ProcessingResult> {
        let key = Self::cache_key(path, input_bytes, options);
        if let Some(cached) = self.result_cache.get(&key) {
            return Ok(cached.clone());
        }

        let processor = self
            .processors
            .get(&asset_type)
            .ok_or_else(|| crate::error::AssetError::Internal(format!(
                "no processor registered for {}",
                asset_type
            )))?;

        let result = processor.process(input_bytes, options)?;
        self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.stats.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .bytes_processed
            .fetch_add(input_bytes.len() as u64, Ordering::Relaxed);
        self.stats
            .total_time_ms
            .fetch_add(result.processing_time.as_millis() as u64, Ordering::Relaxed);

        self.result_cache.insert(key, result.clone());
        Ok(result)
    }

    pub fn statistics(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.stats.total_processed.load(Ordering::Relaxed),
            self.stats.successes.load(Ordering::Relaxed),
            self.stats.failures.load(Ordering::Relaxed),
            self.stats.bytes_processed.load(Ordering::Relaxed),
            self.stats.total_time_ms.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_and_options_hit_the_result_cache() {
        let pipeline = ProcessorPipeline::new();
        let options = ProcessingOptions::default();
        let a = pipeline
            .process("a.png", AssetType::Texture, b"bytes", &options)
            .unwrap();
        let (processed_before, ..) = pipeline.statistics();
        let b = pipeline
            .process("a.png", AssetType::Texture, b"bytes", &options)
            .unwrap();
        let (processed_after, ..) = pipeline.statistics();
        assert_eq!(processed_before, processed_after);
        assert_eq!(a.output_bytes, b.output_bytes);
    }

    #[test]
    fn different_input_misses_the_cache() {
        let pipeline = ProcessorPipeline::new();
        let options = ProcessingOptions::default();
        pipeline
            .process("a.png", AssetType::Texture, b"one", &options)
            .unwrap();
        pipeline
            .process("a.png", AssetType::Texture, b"two", &options)
            .unwrap();
        let (processed, ..) = pipeline.statistics();
        assert_eq!(processed, 2);
    }

    #[test]
    fn unregistered_type_reports_internal_error() {
        let pipeline = ProcessorPipeline::new();
        pipeline.unregister(AssetType::Texture);
        let err = pipeline
            .process("a.png", AssetType::Texture, b"x", &ProcessingOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::error::AssetError::Internal(_)));
    }
}
