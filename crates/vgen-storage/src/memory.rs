//! In-memory asset cache for ephemeral runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use vgen_models::{CacheKey, CachedAsset, QualityProfile};

use crate::cache::AssetCache;
use crate::error::{StorageError, StorageResult};

/// Cache that keeps entries in a process-local map.
///
/// Content bytes are not retained; the entry location is `memory://{key}`.
#[derive(Debug, Default)]
pub struct MemoryAssetCache {
    entries: Mutex<HashMap<CacheKey, CachedAsset>>,
    lookups: AtomicUsize,
    stores: AtomicUsize,
}

impl MemoryAssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `retrieve` calls so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of `store` calls so far.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::ReadFailed("memory cache lock poisoned".to_string())
    }
}

#[async_trait]
impl AssetCache for MemoryAssetCache {
    async fn retrieve(
        &self,
        prompt_text: &str,
        profile: QualityProfile,
    ) -> StorageResult<Option<CachedAsset>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let key = self.key_for(prompt_text, profile);
        let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        Ok(entries.get(&key).cloned())
    }

    async fn store(
        &self,
        content: &[u8],
        prompt_text: &str,
        profile: QualityProfile,
    ) -> StorageResult<CachedAsset> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        let key = self.key_for(prompt_text, profile);
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;

        if let Some(existing) = entries.get(&key) {
            if existing.size_bytes == content.len() as u64 {
                return Ok(existing.clone());
            }
        }

        let asset = CachedAsset {
            key: key.clone(),
            location: format!("memory://{}", key),
            size_bytes: content.len() as u64,
            stored_at: Utc::now(),
        };
        entries.insert(key, asset.clone());
        Ok(asset)
    }
}
