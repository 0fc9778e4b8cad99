//! Asset loading, caching, streaming and hot-reload pipeline for game-style
//! content: textures, meshes, audio, shaders and config/scene data.
//!
//! [`AssetManager`] is the entry point most callers need; the modules below
//! it are public so a host can recompose them (a custom source, a different
//! cache topology, a bespoke streaming controller) without forking the crate.

pub mod cache;
pub mod compression;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod hot_reload;
pub mod id;
pub mod logging;
pub mod manager;
pub mod metadata;
pub mod persistence;
pub mod processor;
pub mod registry;
pub mod source;
pub mod streaming;

pub use config::AssetManagerConfig;
pub use error::{AssetError, AssetResult};
pub use handle::{Asset, AssetHandle, FromPayload, Payload, TypedHandle};
pub use id::{AssetId, AssetState, AssetType, LoadFlags, QualityLevel};
pub use manager::{AssetManager, ManagerStatistics};
pub use metadata::{AssetMetadata, AssetRecord};
pub use registry::Registry;
