use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::id::{AssetId, AssetState, AssetType, QualityLevel};
use crate::metadata::AssetMetadata;

/// Decoded payload for one quality tier. Concrete per-format decoding is a
/// collaborator outside this crate; processors hand back raw bytes plus
/// whatever scalar fields they chose to surface (dimensions, sample rate,
/// vertex counts, ...) as loosely typed properties.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub bytes: Arc<[u8]>,
    pub properties: std::collections::HashMap<String, String>,
}

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Payload {
            bytes: Arc::from(bytes),
            properties: std::collections::HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn state_to_u8(state: AssetState) -> u8 {
    match state {
        AssetState::Unloaded => 0,
        AssetState::Queued => 1,
        AssetState::Loading => 2,
        AssetState::Loaded => 3,
        AssetState::Streaming => 4,
        AssetState::Stale => 5,
        AssetState::Error => 6,
    }
}

fn u8_to_state(v: u8) -> AssetState {
    match v {
        0 => AssetState::Unloaded,
        1 => AssetState::Queued,
        2 => AssetState::Loading,
        3 => AssetState::Loaded,
        4 => AssetState::Streaming,
        5 => AssetState::Stale,
        _ => AssetState::Error,
    }
}

/// A resident asset: identity, lifecycle state, reference count and the
/// per-quality payloads currently installed in memory.
pub struct Asset {
    pub id: AssetId,
    pub asset_type: AssetType,
    metadata: RwLock<AssetMetadata>,
    state: AtomicU8,
    ref_count: AtomicU32,
    version: AtomicU64,
    payloads: RwLock<BTreeMap<QualityLevel, Payload>>,
    memory_usage: AtomicU64,
    error_info: RwLock<Option<String>>,
}

impl Asset {
    pub fn new(metadata: AssetMetadata) -> Self {
        Asset {
            id: metadata.id,
            asset_type: metadata.asset_type,
            metadata: RwLock::new(metadata),
            state: AtomicU8::new(state_to_u8(AssetState::Unloaded)),
            ref_count: AtomicU32::new(0),
            version: AtomicU64::new(0),
            payloads: RwLock::new(BTreeMap::new()),
            memory_usage: AtomicU64::new(0),
            error_info: RwLock::new(None),
        }
    }

    pub fn state(&self) -> AssetState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: AssetState) {
        self.state.store(state_to_u8(state), Ordering::Release);
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    fn add_reference(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the reference count. Dropping below zero is a programming
    /// error: it indicates a handle was released more than once.
    fn remove_reference(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "asset {} reference count underflow", self.id);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_usage.load(Ordering::Acquire)
    }

    pub fn metadata(&self) -> AssetMetadata {
        self.metadata.read().clone()
    }

    pub fn update_metadata<F: FnOnce(&mut AssetMetadata)>(&self, f: F) {
        f(&mut self.metadata.write());
    }

    pub fn error(&self) -> Option<String> {
        self.error_info.read().clone()
    }

    pub fn set_error(&self, message: Option<String>) {
        *self.error_info.write() = message;
    }

    /// Installs a payload at the given quality, recomputing total resident
    /// memory usage across every installed quality tier.
    pub fn install_payload(&self, quality: QualityLevel, payload: Payload) {
        let mut payloads = self.payloads.write();
        payloads.insert(quality, payload);
        let total: u64 = payloads.values().map(|p| p.len() as u64).sum();
        self.memory_usage.store(total, Ordering::Release);
        if let Some((&highest, _)) = payloads.iter().next_back() {
            drop(payloads);
            self.update_metadata(|m| m.current_quality = highest);
        }
    }

    pub fn payload(&self, quality: QualityLevel) -> Option<Payload> {
        self.payloads.read().get(&quality).cloned()
    }

    pub fn highest_payload(&self) -> Option<(QualityLevel, Payload)> {
        self.payloads
            .read()
            .iter()
            .next_back()
            .map(|(q, p)| (*q, p.clone()))
    }

    pub fn drop_payload(&self, quality: QualityLevel) {
        let mut payloads = self.payloads.write();
        payloads.remove(&quality);
        let total: u64 = payloads.values().map(|p| p.len() as u64).sum();
        self.memory_usage.store(total, Ordering::Release);
    }

    pub fn installed_qualities(&self) -> Vec<QualityLevel> {
        self.payloads.read().keys().copied().collect()
    }
}

/// A shared, reference-counted reference to a resident [`Asset`].
///
/// Acquisition increments the asset's reference count; dropping the last
/// handle decrements it to zero, making the asset eligible for garbage
/// collection. Comparison and hashing are by identity.
pub struct AssetHandle {
    asset: Arc<Asset>,
}

impl AssetHandle {
    pub(crate) fn new(asset: Arc<Asset>) -> Self {
        asset.add_reference();
        AssetHandle { asset }
    }

    pub fn id(&self) -> AssetId {
        self.asset.id
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset.asset_type
    }

    pub fn state(&self) -> AssetState {
        self.asset.state()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state(), AssetState::Loaded | AssetState::Streaming)
    }

    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    pub(crate) fn asset_arc(&self) -> Arc<Asset> {
        Arc::clone(&self.asset)
    }
}

impl Clone for AssetHandle {
    fn clone(&self) -> Self {
        self.asset.add_reference();
        AssetHandle {
            asset: Arc::clone(&self.asset),
        }
    }
}

impl Drop for AssetHandle {
    fn drop(&mut self) {
        self.asset.remove_reference();
    }
}

impl PartialEq for AssetHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.asset, &other.asset)
    }
}
impl Eq for AssetHandle {}

impl std::hash::Hash for AssetHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.asset) as usize).hash(state);
    }
}

/// Trait implemented by strongly-typed views over a payload, used to narrow
/// a generic [`AssetHandle`] at construction time without virtual dispatch.
pub trait FromPayload: Sized {
    fn from_payload(payload: &Payload) -> Option<Self>;
}

/// A compile-time-tagged wrapper narrowing access to one asset's payload.
pub struct TypedHandle<T: FromPayload> {
    handle: AssetHandle,
    _marker: PhantomData<T>,
}

impl<T: FromPayload> TypedHandle<T> {
    pub fn new(handle: AssetHandle) -> Option<Self> {
        let (_, payload) = handle.asset().highest_payload()?;
        T::from_payload(&payload)?;
        Some(TypedHandle {
            handle,
            _marker: PhantomData,
        })
    }

    pub fn get(&self) -> Option<T> {
        let (_, payload) = self.handle.asset().highest_payload()?;
        T::from_payload(&payload)
    }

    pub fn handle(&self) -> &AssetHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AssetType;

    fn sample_asset() -> Arc<Asset> {
        Arc::new(Asset::new(AssetMetadata::new(
            AssetId(42),
            AssetType::Texture,
            "textures/a.png",
        )))
    }

    #[test]
    fn handle_acquire_and_release_tracks_ref_count() {
        let asset = sample_asset();
        assert_eq!(asset.ref_count(), 0);
        let h1 = AssetHandle::new(Arc::clone(&asset));
        assert_eq!(asset.ref_count(), 1);
        let h2 = h1.clone();
        assert_eq!(asset.ref_count(), 2);
        drop(h1);
        assert_eq!(asset.ref_count(), 1);
        drop(h2);
        assert_eq!(asset.ref_count(), 0);
    }

    #[test]
    fn install_payload_updates_memory_usage_and_current_quality() {
        let asset = sample_asset();
        asset.install_payload(QualityLevel::Low, Payload::new(vec![0; 10]));
        assert_eq!(asset.memory_usage(), 10);
        asset.install_payload(QualityLevel::High, Payload::new(vec![0; 30]));
        assert_eq!(asset.memory_usage(), 40);
        assert_eq!(asset.metadata().current_quality, QualityLevel::High);
    }

    #[test]
    #[should_panic]
    fn double_release_panics() {
        let asset = sample_asset();
        let handle = AssetHandle::new(Arc::clone(&asset));
        asset.remove_reference();
        drop(handle);
    }

    #[test]
    fn handles_to_same_asset_are_equal() {
        let asset = sample_asset();
        let h1 = AssetHandle::new(Arc::clone(&asset));
        let h2 = h1.clone();
        assert_eq!(h1, h2);
    }
}
