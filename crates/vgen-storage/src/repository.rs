//! Durable asset repository used by transaction commit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use vgen_models::{AssetId, GeneratedAsset};

use crate::error::{StorageError, StorageResult};

/// Durable store for committed asset records.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Persist one asset record.
    async fn save(&self, asset: &GeneratedAsset) -> StorageResult<()>;

    /// Remove a previously saved record. Used to compensate a failed commit.
    async fn remove(&self, id: &AssetId) -> StorageResult<()>;
}

/// Repository writing one JSON document per asset: `{root}/{asset_id}.json`.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    root: PathBuf,
}

impl JsonFileRepository {
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &AssetId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Load a saved record.
    pub async fn load(&self, id: &AssetId) -> StorageResult<GeneratedAsset> {
        let path = self.path_for(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl AssetRepository for JsonFileRepository {
    async fn save(&self, asset: &GeneratedAsset) -> StorageResult<()> {
        let payload = serde_json::to_vec_pretty(asset)?;
        let path = self.path_for(&asset.id);
        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| StorageError::write_failed(format!("{}: {}", path.display(), e)))?;
        debug!(asset_id = %asset.id, path = %path.display(), "Saved asset record");
        Ok(())
    }

    async fn remove(&self, id: &AssetId) -> StorageResult<()> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Repository keeping records in memory.
#[derive(Debug, Default)]
pub struct MemoryAssetRepository {
    records: Mutex<HashMap<AssetId, GeneratedAsset>>,
}

impl MemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all saved records.
    pub fn saved(&self) -> Vec<GeneratedAsset> {
        self.records
            .lock()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.records.lock().map(|r| r.contains_key(id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetRepository {
    async fn save(&self, asset: &GeneratedAsset) -> StorageResult<()> {
        self.records
            .lock()
            .map_err(|_| StorageError::write_failed("repository lock poisoned"))?
            .insert(asset.id.clone(), asset.clone());
        Ok(())
    }

    async fn remove(&self, id: &AssetId) -> StorageResult<()> {
        self.records
            .lock()
            .map_err(|_| StorageError::delete_failed("repository lock poisoned"))?
            .remove(id);
        Ok(())
    }
}
