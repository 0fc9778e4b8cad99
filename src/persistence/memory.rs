use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{AssetError, AssetResult};
use crate::id::AssetId;
use crate::metadata::AssetRecord;

use super::{matches_filter, sort_and_paginate, PersistenceBackend, QueryFilter};

const CURRENT_SCHEMA_VERSION: i32 = 1;

#[derive(Default)]
struct Store {
    records: HashMap<AssetId, AssetRecord>,
    by_path: HashMap<String, AssetId>,
    tags: HashMap<AssetId, HashSet<String>>,
    dependencies: HashMap<AssetId, HashSet<AssetId>>,
}

/// Process-local persistence backend with no durable storage, used in tests
/// and for short-lived tooling that does not want a SQLite file on disk.
pub struct InMemoryPersistence {
    store: Mutex<Store>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        InMemoryPersistence { store: Mutex::new(Store::default()) }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceBackend for InMemoryPersistence {
    fn insert(&self, record: AssetRecord) -> AssetResult<()> {
        self.update(record)
    }

    fn update(&self, record: AssetRecord) -> AssetResult<()> {
        let mut store = self.store.lock().unwrap();
        store.by_path.insert(record.metadata.path.clone(), record.metadata.id);
        store.records.insert(record.metadata.id, record);
        Ok(())
    }

    fn delete(&self, id: AssetId) -> AssetResult<bool> {
        let mut store = self.store.lock().unwrap();
        let removed = store.records.remove(&id);
        if let Some(record) = &removed {
            store.by_path.remove(&record.metadata.path);
        }
        store.tags.remove(&id);
        store.dependencies.remove(&id);
        for deps in store.dependencies.values_mut() {
            deps.remove(&id);
        }
        Ok(removed.is_some())
    }

    fn get(&self, id: AssetId) -> AssetResult<Option<AssetRecord>> {
        Ok(self.store.lock().unwrap().records.get(&id).cloned())
    }

    fn get_by_path(&self, path: &str) -> AssetResult<Option<AssetRecord>> {
        let store = self.store.lock().unwrap();
        Ok(store.by_path.get(path).and_then(|id| store.records.get(id).cloned()))
    }

    fn query(&self, filter: &QueryFilter) -> AssetResult<Vec<AssetRecord>> {
        let store = self.store.lock().unwrap();
        let mut matched = Vec::new();
        for record in store.records.values() {
            if let Some(dep) = filter.depends_on {
                if !record.metadata.dependencies.contains(&dep) {
                    continue;
                }
            }
            let tags: Vec<String> = store
                .tags
                .get(&record.metadata.id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            if matches_filter(record, filter, &tags) {
                matched.push(record.clone());
            }
        }
        Ok(sort_and_paginate(matched, filter))
    }

    fn add_tag(&self, id: AssetId, tag: &str) -> AssetResult<()> {
        let mut store = self.store.lock().unwrap();
        store.tags.entry(id).or_default().insert(tag.to_string());
        Ok(())
    }

    fn remove_tag(&self, id: AssetId, tag: &str) -> AssetResult<()> {
        let mut store = self.store.lock().unwrap();
        if let Some(set) = store.tags.get_mut(&id) {
            set.remove(tag);
        }
        Ok(())
    }

    fn tags(&self, id: AssetId) -> AssetResult<Vec<String>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .tags
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn add_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()> {
        let mut store = self.store.lock().unwrap();
        store.dependencies.entry(asset).or_default().insert(dependency);
        Ok(())
    }

    fn remove_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()> {
        let mut store = self.store.lock().unwrap();
        if let Some(set) = store.dependencies.get_mut(&asset) {
            set.remove(&dependency);
        }
        Ok(())
    }

    fn dependencies(&self, asset: AssetId) -> AssetResult<Vec<AssetId>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .dependencies
            .get(&asset)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn optimize(&self) -> AssetResult<()> {
        Ok(())
    }

    fn vacuum(&self) -> AssetResult<()> {
        Ok(())
    }

    fn backup(&self, _destination: &Path) -> AssetResult<()> {
        Err(AssetError::Internal("in-memory persistence store has nothing to back up".into()))
    }

    fn restore(&self, _source: &Path) -> AssetResult<()> {
        Err(AssetError::Internal("in-memory persistence store cannot be restored".into()))
    }

    fn integrity_check(&self) -> AssetResult<bool> {
        Ok(true)
    }

    fn schema_version(&self) -> AssetResult<i32> {
        Ok(CURRENT_SCHEMA_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AssetType;
    use crate::metadata::AssetMetadata;

    fn sample(id: u64, path: &str) -> AssetRecord {
        AssetRecord::new(AssetMetadata::new(AssetId(id), AssetType::Mesh, path))
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let db = InMemoryPersistence::new();
        db.insert(sample(1, "a.obj")).unwrap();
        assert!(db.get(AssetId(1)).unwrap().is_some());
        assert!(db.delete(AssetId(1)).unwrap());
        assert!(db.get(AssetId(1)).unwrap().is_none());
    }

    #[test]
    fn get_by_path_tracks_renames_on_update() {
        let db = InMemoryPersistence::new();
        db.insert(sample(1, "a.obj")).unwrap();
        let mut renamed = sample(1, "b.obj");
        renamed.metadata.path = "b.obj".into();
        db.update(renamed).unwrap();
        assert!(db.get_by_path("b.obj").unwrap().is_some());
    }

    #[test]
    fn tag_and_dependency_queries_round_trip() {
        let db = InMemoryPersistence::new();
        db.insert(sample(1, "a.obj")).unwrap();
        db.insert(sample(2, "b.obj")).unwrap();
        db.add_tag(AssetId(1), "level1").unwrap();
        db.add_dependency(AssetId(1), AssetId(2)).unwrap();

        let tagged = db.query(&QueryFilter { tag: Some("level1".into()), ..QueryFilter::default() }).unwrap();
        assert_eq!(tagged.len(), 1);

        let dependents = db
            .query(&QueryFilter { depends_on: Some(AssetId(2)), ..QueryFilter::default() })
            .unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].metadata.id, AssetId(1));
    }

    #[test]
    fn backup_and_restore_are_unsupported() {
        let db = InMemoryPersistence::new();
        assert!(db.backup(Path::new("/tmp/x")).is_err());
        assert!(db.restore(Path::new("/tmp/x")).is_err());
    }
}
