//! Asset cache and asset repository.
//!
//! This crate provides:
//! - The content-addressed cache contract consumed by generation jobs
//! - A local filesystem cache and an in-memory cache
//! - The asset repository contract used by transaction commit
//! - JSON-file and in-memory repositories

pub mod cache;
pub mod error;
pub mod local_cache;
pub mod memory;
pub mod repository;

pub use cache::AssetCache;
pub use error::{StorageError, StorageResult};
pub use local_cache::LocalAssetCache;
pub use memory::MemoryAssetCache;
pub use repository::{AssetRepository, JsonFileRepository, MemoryAssetRepository};
