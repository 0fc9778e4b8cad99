pub mod memory;
pub mod sqlite;

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::AssetResult;
use crate::id::{AssetId, AssetType};
use crate::metadata::AssetRecord;

pub use memory::InMemoryPersistence;
pub use sqlite::SqlitePersistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Path,
    Size,
    LastModified,
    AccessCount,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Path
    }
}

/// Filter + sort + pagination parameters for `PersistenceBackend::query`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub asset_type: Option<AssetType>,
    pub path_glob: Option<String>,
    pub tag: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub depends_on: Option<AssetId>,
    pub sort_by: SortKey,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Durable, queryable store of [`AssetRecord`]s. Two backends satisfy this
/// interface: an embedded SQLite store for production use and an in-memory
/// store for tests. Runtime lifecycle state (`AssetState`) belongs to the
/// [`crate::registry::Registry`]/[`crate::handle::Asset`] pair, not here —
/// this layer persists the metadata and cross-run analytics that outlive a
/// process, which is why `QueryFilter` has no state predicate.
pub trait PersistenceBackend: Send + Sync {
    fn insert(&self, record: AssetRecord) -> AssetResult<()>;
    fn update(&self, record: AssetRecord) -> AssetResult<()>;
    fn delete(&self, id: AssetId) -> AssetResult<bool>;
    fn get(&self, id: AssetId) -> AssetResult<Option<AssetRecord>>;
    fn get_by_path(&self, path: &str) -> AssetResult<Option<AssetRecord>>;

    fn insert_batch(&self, records: Vec<AssetRecord>) -> AssetResult<()> {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    fn delete_batch(&self, ids: &[AssetId]) -> AssetResult<usize> {
        let mut count = 0;
        for &id in ids {
            if self.delete(id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn query(&self, filter: &QueryFilter) -> AssetResult<Vec<AssetRecord>>;

    fn add_tag(&self, id: AssetId, tag: &str) -> AssetResult<()>;
    fn remove_tag(&self, id: AssetId, tag: &str) -> AssetResult<()>;
    fn tags(&self, id: AssetId) -> AssetResult<Vec<String>>;

    fn add_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()>;
    fn remove_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()>;
    fn dependencies(&self, asset: AssetId) -> AssetResult<Vec<AssetId>>;

    fn optimize(&self) -> AssetResult<()>;
    fn vacuum(&self) -> AssetResult<()>;
    fn backup(&self, destination: &Path) -> AssetResult<()>;
    fn restore(&self, source: &Path) -> AssetResult<()>;
    fn integrity_check(&self) -> AssetResult<bool>;
    fn schema_version(&self) -> AssetResult<i32>;
}

pub(crate) fn matches_filter(record: &AssetRecord, filter: &QueryFilter, tags: &[String]) -> bool {
    if let Some(t) = filter.asset_type {
        if record.metadata.asset_type != t {
            return false;
        }
    }
    if let Some(pattern) = &filter.path_glob {
        if let Ok(glob) = glob::Pattern::new(pattern) {
            if !glob.matches(&record.metadata.path) {
                return false;
            }
        }
    }
    if let Some(min) = filter.min_size {
        if record.metadata.size_bytes < min {
            return false;
        }
    }
    if let Some(max) = filter.max_size {
        if record.metadata.size_bytes > max {
            return false;
        }
    }
    if let Some(after) = filter.modified_after {
        if record.metadata.last_modified < after {
            return false;
        }
    }
    if let Some(before) = filter.modified_before {
        if record.metadata.last_modified > before {
            return false;
        }
    }
    if let Some(tag) = &filter.tag {
        if !tags.iter().any(|t| t == tag) {
            return false;
        }
    }
    true
}

pub(crate) fn sort_and_paginate(mut records: Vec<AssetRecord>, filter: &QueryFilter) -> Vec<AssetRecord> {
    records.sort_by(|a, b| {
        let ord = match filter.sort_by {
            SortKey::Path => a.metadata.path.cmp(&b.metadata.path),
            SortKey::Size => a.metadata.size_bytes.cmp(&b.metadata.size_bytes),
            SortKey::LastModified => a.metadata.last_modified.cmp(&b.metadata.last_modified),
            SortKey::AccessCount => a.access_count.cmp(&b.access_count),
        };
        if filter.descending { ord.reverse() } else { ord }
    });
    let records: Vec<AssetRecord> = records.into_iter().skip(filter.offset).collect();
    match filter.limit {
        Some(limit) => records.into_iter().take(limit).collect(),
        None => records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AssetId;
    use crate::metadata::AssetMetadata;

    #[test]
    fn filter_rejects_on_type_and_size() {
        let meta = AssetMetadata::new(AssetId(1), AssetType::Texture, "a.png");
        let mut record = AssetRecord::new(meta);
        record.metadata.size_bytes = 500;
        let filter = QueryFilter {
            asset_type: Some(AssetType::Audio),
            ..QueryFilter::default()
        };
        assert!(!matches_filter(&record, &filter, &[]));

        let filter = QueryFilter {
            min_size: Some(1000),
            ..QueryFilter::default()
        };
        assert!(!matches_filter(&record, &filter, &[]));
    }

    #[test]
    fn sort_and_paginate_orders_and_slices() {
        let mut records = Vec::new();
        for (i, size) in [(1u64, 30u64), (2, 10), (3, 20)] {
            let mut meta = AssetMetadata::new(AssetId(i), AssetType::Binary, format!("{}.bin", i));
            meta.size_bytes = size;
            records.push(AssetRecord::new(meta));
        }
        let filter = QueryFilter {
            sort_by: SortKey::Size,
            limit: Some(2),
            ..QueryFilter::default()
        };
        let sorted = sort_and_paginate(records, &filter);
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].metadata.size_bytes, 10);
        assert_eq!(sorted[1].metadata.size_bytes, 20);
    }
}
