use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AssetId, AssetType, LoadFlags, QualityLevel};

/// Per-asset record owned by the Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub id: AssetId,
    pub asset_type: AssetType,
    pub path: String,
    pub name: String,
    pub version: u64,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub flags: LoadFlags,
    pub current_quality: QualityLevel,
    pub dependencies: Vec<AssetId>,
    pub custom_properties: HashMap<String, String>,
}

impl AssetMetadata {
    pub fn new(id: AssetId, asset_type: AssetType, path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit('/')
            .next()
            .unwrap_or(&path)
            .to_string();
        AssetMetadata {
            id,
            asset_type,
            path,
            name,
            version: 0,
            size_bytes: 0,
            last_modified: Utc::now(),
            flags: LoadFlags::default(),
            current_quality: QualityLevel::Low,
            dependencies: Vec::new(),
            custom_properties: HashMap::new(),
        }
    }
}

/// Persistence-facing view: metadata plus cross-run analytics fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub metadata: AssetMetadata,
    pub access_count: u64,
    pub total_load_time_ms: f64,
    pub file_hash: String,
    pub mime_type: String,
    pub compressed_size: u64,
    pub error_count: u64,
}

impl AssetRecord {
    pub fn new(metadata: AssetMetadata) -> Self {
        AssetRecord {
            metadata,
            access_count: 0,
            total_load_time_ms: 0.0,
            file_hash: String::new(),
            mime_type: String::new(),
            compressed_size: 0,
            error_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_derives_name_from_path() {
        let meta = AssetMetadata::new(AssetId(1), AssetType::Texture, "textures/wall.png");
        assert_eq!(meta.name, "wall.png");
    }

    #[test]
    fn record_wraps_metadata_with_zeroed_analytics() {
        let meta = AssetMetadata::new(AssetId(2), AssetType::Audio, "audio/click.wav");
        let record = AssetRecord::new(meta);
        assert_eq!(record.access_count, 0);
        assert_eq!(record.error_count, 0);
    }
}
