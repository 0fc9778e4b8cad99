mod graph;

pub use graph::DependencyGraph;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glob::Pattern;
use log::debug;
use parking_lot::RwLock;

use crate::error::{AssetError, AssetResult};
use crate::handle::{Asset, AssetHandle};
use crate::id::{AssetId, AssetState, AssetType};
use crate::metadata::AssetMetadata;

/// Observer callback: `(id, old_state, new_state)`, fired after a state
/// transition is committed and outside any registry lock.
pub type StateChangeCallback = Arc<dyn Fn(AssetId, AssetState, AssetState) + Send + Sync>;

struct Inner {
    assets: HashMap<AssetId, Arc<Asset>>,
    path_to_id: HashMap<String, AssetId>,
    graph: DependencyGraph,
}

/// Owns asset identity, state, reference counts and the dependency graph.
///
/// A single reader-writer lock guards the maps; observer callbacks fire
/// after the lock is released to avoid reentrancy deadlocks.
pub struct Registry {
    inner: RwLock<Inner>,
    callbacks: RwLock<Vec<StateChangeCallback>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: RwLock::new(Inner {
                assets: HashMap::new(),
                path_to_id: HashMap::new(),
                graph: DependencyGraph::new(),
            }),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Idempotent: a path already registered returns its existing id.
    pub fn register(&self, path: &str, asset_type: AssetType) -> AssetId {
        let mut inner = self.inner.write();
        if let Some(&id) = inner.path_to_id.get(path) {
            return id;
        }
        let id = crate::id::asset_id_from_path(path);
        let metadata = AssetMetadata::new(id, asset_type, path);
        inner.assets.insert(id, Arc::new(Asset::new(metadata)));
        inner.path_to_id.insert(path.to_string(), id);
        debug!("registered asset {} at '{}'", id, path);
        id
    }

    fn asset(&self, id: AssetId) -> AssetResult<Arc<Asset>> {
        self.inner
            .read()
            .assets
            .get(&id)
            .cloned()
            .ok_or(AssetError::NotFound {
                path: std::path::PathBuf::from(id.to_string()),
            })
    }

    /// Transitions an Unloaded/Queued/Loading asset to Loaded.
    pub fn install(
        &self,
        id: AssetId,
        quality: crate::id::QualityLevel,
        payload: crate::handle::Payload,
    ) -> AssetResult<()> {
        let asset = self.asset(id)?;
        if !asset.state().can_install_from() {
            return Err(AssetError::WrongState {
                id: id.0,
                expected: "Unloaded|Queued|Loading".into(),
                actual: asset.state().to_string(),
            });
        }
        asset.install_payload(quality, payload);
        self.set_state(id, AssetState::Loaded)?;
        Ok(())
    }

    pub fn get(&self, id: AssetId) -> Option<AssetHandle> {
        self.inner
            .read()
            .assets
            .get(&id)
            .cloned()
            .map(AssetHandle::new)
    }

    pub fn find_by_path(&self, path: &str) -> Option<AssetHandle> {
        let id = *self.inner.read().path_to_id.get(path)?;
        self.get(id)
    }

    pub fn find_by_type(&self, asset_type: AssetType) -> Vec<AssetId> {
        self.inner
            .read()
            .assets
            .values()
            .filter(|a| a.asset_type == asset_type)
            .map(|a| a.id)
            .collect()
    }

    pub fn find_by_pattern(&self, pattern: &str) -> AssetResult<Vec<AssetId>> {
        let glob = Pattern::new(pattern)
            .map_err(|e| AssetError::Internal(format!("invalid glob '{}': {}", pattern, e)))?;
        let inner = self.inner.read();
        Ok(inner
            .path_to_id
            .iter()
            .filter(|(path, _)| glob.matches(path))
            .map(|(_, &id)| id)
            .collect())
    }

    pub fn has_asset(&self, id: AssetId) -> bool {
        self.inner.read().assets.contains_key(&id)
    }

    /// Equivalent to `get`, expressed as the spec's acquire/release pair.
    pub fn acquire(&self, id: AssetId) -> Option<AssetHandle> {
        self.get(id)
    }

    pub fn add_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()> {
        let mut inner = self.inner.write();
        if !inner.assets.contains_key(&dependency) {
            return Err(AssetError::DependencyMissing { asset, dependency });
        }
        inner.graph.add_dependency(asset, dependency)?;
        if let Some(a) = inner.assets.get(&asset).cloned() {
            a.update_metadata(|m| {
                if !m.dependencies.contains(&dependency) {
                    m.dependencies.push(dependency);
                }
            });
        }
        Ok(())
    }

    pub fn remove_dependency(&self, asset: AssetId, dependency: AssetId) {
        let mut inner = self.inner.write();
        inner.graph.remove_dependency(asset, dependency);
    }

    pub fn dependencies_of(&self, asset: AssetId) -> Vec<AssetId> {
        self.inner.read().graph.dependencies_of(asset)
    }

    pub fn dependents_of(&self, asset: AssetId) -> Vec<AssetId> {
        self.inner.read().graph.dependents_of(asset)
    }

    pub fn transitive_dependents(&self, asset: AssetId) -> Vec<AssetId> {
        self.inner.read().graph.transitive_dependents(asset)
    }

    pub fn topological_load_order(&self, ids: &[AssetId]) -> Vec<AssetId> {
        self.inner.read().graph.topological_load_order(ids)
    }

    pub fn mark_stale(&self, id: AssetId) -> AssetResult<()> {
        self.set_state(id, AssetState::Stale)
    }

    pub fn dirty_set(&self) -> Vec<AssetId> {
        self.inner
            .read()
            .assets
            .values()
            .filter(|a| a.state() == AssetState::Stale)
            .map(|a| a.id)
            .collect()
    }

    pub fn unreferenced_set(&self) -> Vec<AssetId> {
        self.inner
            .read()
            .assets
            .values()
            .filter(|a| a.ref_count() == 0)
            .map(|a| a.id)
            .collect()
    }

    /// Sets the asset's state and notifies observers after the internal
    /// lock has been released, so callbacks can safely call back into the
    /// registry without deadlocking.
    pub fn set_state(&self, id: AssetId, new_state: AssetState) -> AssetResult<()> {
        let asset = self.asset(id)?;
        let old_state = asset.state();
        asset.set_state(new_state);
        let callbacks = self.callbacks.read().clone();
        for callback in callbacks.iter() {
            callback(id, old_state, new_state);
        }
        Ok(())
    }

    pub fn register_state_change_callback(&self, callback: StateChangeCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn get_metadata(&self, id: AssetId) -> AssetResult<AssetMetadata> {
        Ok(self.asset(id)?.metadata())
    }

    pub fn bump_version(&self, id: AssetId) -> AssetResult<u64> {
        Ok(self.asset(id)?.bump_version())
    }

    pub fn set_error(&self, id: AssetId, message: String) -> AssetResult<()> {
        self.asset(id)?.set_error(Some(message));
        self.set_state(id, AssetState::Error)
    }

    /// Drops every asset with ref_count 0, no Persistent flag, and no
    /// pending Stale reload. O(n) scan; expected to run rarely.
    pub fn gc(&self) -> Vec<AssetId> {
        let mut inner = self.inner.write();
        let to_drop: Vec<AssetId> = inner
            .assets
            .values()
            .filter(|a| {
                a.ref_count() == 0
                    && !a.metadata().flags.contains(crate::id::LoadFlags::PERSISTENT)
                    && a.state() != AssetState::Stale
            })
            .map(|a| a.id)
            .collect();
        for id in &to_drop {
            if let Some(asset) = inner.assets.remove(id) {
                let path = asset.metadata().path;
                inner.path_to_id.remove(&path);
                inner.graph.remove_asset(*id);
            }
        }
        if !to_drop.is_empty() {
            debug!("gc collected {} assets", to_drop.len());
        }
        to_drop
    }

    pub fn asset_count(&self) -> usize {
        self.inner.read().assets.len()
    }

    pub fn memory_usage(&self) -> u64 {
        self.inner.read().assets.values().map(|a| a.memory_usage()).sum()
    }

    pub fn all_ids(&self) -> Vec<AssetId> {
        self.inner.read().assets.keys().copied().collect()
    }

    pub(crate) fn raw_asset(&self, id: AssetId) -> AssetResult<Arc<Asset>> {
        self.asset(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Payload;
    use crate::id::QualityLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn register_is_idempotent() {
        let reg = Registry::new();
        let a = reg.register("textures/a.png", AssetType::Texture);
        let b = reg.register("textures/a.png", AssetType::Texture);
        assert_eq!(a, b);
        assert_eq!(reg.asset_count(), 1);
    }

    #[test]
    fn install_requires_permitted_predecessor_state() {
        let reg = Registry::new();
        let id = reg.register("x.png", AssetType::Texture);
        reg.install(id, QualityLevel::Low, Payload::new(vec![1, 2, 3]))
            .unwrap();
        let err = reg
            .install(id, QualityLevel::Low, Payload::new(vec![4]))
            .unwrap_err();
        assert!(matches!(err, AssetError::WrongState { .. }));
    }

    #[test]
    fn handles_track_ref_count_and_gc_collects_at_zero() {
        let reg = Registry::new();
        let id = reg.register("a.png", AssetType::Texture);
        reg.install(id, QualityLevel::Low, Payload::new(vec![0u8; 8]))
            .unwrap();
        let handle = reg.get(id).unwrap();
        assert_eq!(handle.asset().ref_count(), 1);
        drop(handle);
        assert_eq!(reg.unreferenced_set(), vec![id]);
        let collected = reg.gc();
        assert_eq!(collected, vec![id]);
        assert_eq!(reg.asset_count(), 0);
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let reg = Registry::new();
        let a = reg.register("a.mat", AssetType::Material);
        let b = reg.register("b.shader", AssetType::Shader);
        reg.add_dependency(a, b).unwrap();
        let err = reg.add_dependency(b, a).unwrap_err();
        assert!(matches!(err, AssetError::WouldCreateCycle { .. }));
    }

    #[test]
    fn state_change_callbacks_fire_outside_lock() {
        let reg = Registry::new();
        let id = reg.register("a.png", AssetType::Texture);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        reg.register_state_change_callback(Arc::new(move |_, _, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        reg.set_state(id, AssetState::Queued).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn find_by_pattern_matches_glob() {
        let reg = Registry::new();
        reg.register("textures/a.png", AssetType::Texture);
        reg.register("audio/b.wav", AssetType::Audio);
        let matches = reg.find_by_pattern("textures/*.png").unwrap();
        assert_eq!(matches.len(), 1);
    }
}
