//! Cache contract consumed by generation jobs.

use async_trait::async_trait;

use vgen_models::{CacheKey, CachedAsset, QualityProfile};

use crate::error::StorageResult;

/// Content-addressable store mapping (prompt text, quality profile) to a
/// previously produced asset.
///
/// Implementations must be safe for concurrent readers and writers.
#[async_trait]
pub trait AssetCache: Send + Sync {
    /// Pure lookup. Returns `Ok(None)` on a miss.
    async fn retrieve(
        &self,
        prompt_text: &str,
        profile: QualityProfile,
    ) -> StorageResult<Option<CachedAsset>>;

    /// Register newly produced content under the derived key.
    ///
    /// Storing the same key twice with equivalent content is a no-op that
    /// returns the existing entry.
    async fn store(
        &self,
        content: &[u8],
        prompt_text: &str,
        profile: QualityProfile,
    ) -> StorageResult<CachedAsset>;

    /// Key derivation shared by every implementation.
    fn key_for(&self, prompt_text: &str, profile: QualityProfile) -> CacheKey {
        CacheKey::derive(prompt_text, profile)
    }
}
