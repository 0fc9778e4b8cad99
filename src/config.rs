use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for an [`crate::manager::AssetManager`] instance.
/// Constructed from defaults, a TOML file, or environment overrides, in that
/// precedence order (env wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetManagerConfig {
    pub asset_root_path: PathBuf,
    pub disk_cache_dir: PathBuf,
    pub max_memory_mb: u64,
    pub cache_size_mb: u64,
    pub worker_threads: usize,
    pub enable_hot_reload: bool,
    pub enable_compression: bool,
    pub enable_streaming: bool,
    pub enable_memory_mapping: bool,
}

impl Default for AssetManagerConfig {
    fn default() -> Self {
        AssetManagerConfig {
            asset_root_path: PathBuf::from("assets"),
            disk_cache_dir: PathBuf::from(".asset_cache"),
            max_memory_mb: 512,
            cache_size_mb: 256,
            worker_threads: num_cpus::get().max(1),
            enable_hot_reload: cfg!(debug_assertions),
            enable_compression: true,
            enable_streaming: true,
            enable_memory_mapping: false,
        }
    }
}

impl AssetManagerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Overlays recognized `ASSET_*` environment variables on top of `self`.
    /// Missing or unparsable variables are ignored, leaving the prior value.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("ASSET_ROOT") {
            self.asset_root_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ASSET_CACHE_DIR") {
            self.disk_cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ASSET_MEM_BUDGET_MB") {
            if let Ok(parsed) = v.parse() {
                self.max_memory_mb = parsed;
            }
        }
        if let Ok(v) = std::env::var("ASSET_WORKERS") {
            if let Ok(parsed) = v.parse() {
                self.worker_threads = parsed;
            }
        }
        self
    }

    pub fn load() -> Self {
        AssetManagerConfig::default().apply_env_overrides()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_threads_is_at_least_one() {
        assert!(AssetManagerConfig::default().worker_threads >= 1);
    }

    #[test]
    fn toml_round_trip_overrides_defaults() {
        let toml_text = r#"
            asset_root_path = "game_assets"
            disk_cache_dir = "cache"
            max_memory_mb = 1024
            cache_size_mb = 512
            worker_threads = 4
            enable_hot_reload = false
            enable_compression = true
            enable_streaming = true
            enable_memory_mapping = true
        "#;
        let config = AssetManagerConfig::from_toml_str(toml_text).unwrap();
        assert_eq!(config.max_memory_mb, 1024);
        assert!(!config.enable_hot_reload);
    }

    #[test]
    fn env_override_takes_precedence_over_default() {
        std::env::set_var("ASSET_WORKERS", "7");
        let config = AssetManagerConfig::default().apply_env_overrides();
        assert_eq!(config.worker_threads, 7);
        std::env::remove_var("ASSET_WORKERS");
    }
}
