//! Local filesystem asset cache.
//!
//! Layout under the cache root:
//! - `{key}.mp4`  asset content
//! - `{key}.json` [`CachedAsset`] metadata, written last
//!
//! An entry exists only when both files are present and the metadata parses.
//! Anything else (missing content, corrupt JSON, version drift) reads as a miss.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use vgen_models::{CacheKey, CachedAsset, QualityProfile};

use crate::cache::AssetCache;
use crate::error::{StorageError, StorageResult};

const CONTENT_EXTENSION: &str = "mp4";
const METADATA_EXTENSION: &str = "json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Asset cache backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalAssetCache {
    root: PathBuf,
}

impl LocalAssetCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::config_error(format!(
                "Failed to create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key, CONTENT_EXTENSION))
    }

    fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key, METADATA_EXTENSION))
    }

    fn tmp_path(&self, key: &CacheKey, ext: &str) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{}.{}.{}.{}.tmp", key, std::process::id(), n, ext))
    }

    /// Write `bytes` to `dest` via a temp file and rename.
    async fn write_atomic(&self, key: &CacheKey, dest: &Path, ext: &str, bytes: &[u8]) -> StorageResult<()> {
        let tmp = self.tmp_path(key, ext);
        if let Err(e) = Self::write_and_rename(&tmp, dest, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::write_failed(format!(
                "{}: {}",
                dest.display(),
                e
            )));
        }
        Ok(())
    }

    async fn write_and_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(tmp, dest).await
    }

    async fn load(&self, key: &CacheKey) -> Option<CachedAsset> {
        let raw = match tokio::fs::read(self.metadata_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache metadata, treating as miss");
                return None;
            }
        };

        let asset: CachedAsset = match serde_json::from_slice(&raw) {
            Ok(asset) => asset,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache metadata, treating as miss");
                return None;
            }
        };

        if asset.key != *key {
            debug!(key = %key, stored = %asset.key, "Cache metadata key mismatch, treating as miss");
            return None;
        }

        match tokio::fs::metadata(self.content_path(key)).await {
            Ok(meta) if meta.len() == asset.size_bytes => Some(asset),
            Ok(meta) => {
                warn!(
                    key = %key,
                    expected = asset.size_bytes,
                    actual = meta.len(),
                    "Cached content size mismatch, treating as miss"
                );
                None
            }
            Err(_) => {
                debug!(key = %key, "Cache metadata present but content missing");
                None
            }
        }
    }
}

#[async_trait]
impl AssetCache for LocalAssetCache {
    async fn retrieve(
        &self,
        prompt_text: &str,
        profile: QualityProfile,
    ) -> StorageResult<Option<CachedAsset>> {
        let key = self.key_for(prompt_text, profile);
        Ok(self.load(&key).await)
    }

    async fn store(
        &self,
        content: &[u8],
        prompt_text: &str,
        profile: QualityProfile,
    ) -> StorageResult<CachedAsset> {
        let key = self.key_for(prompt_text, profile);

        if let Some(existing) = self.load(&key).await {
            if existing.size_bytes == content.len() as u64 {
                debug!(key = %key, "Cache entry already present, skipping write");
                return Ok(existing);
            }
            debug!(key = %key, "Overwriting cache entry with new content");
        }

        let content_path = self.content_path(&key);
        self.write_atomic(&key, &content_path, CONTENT_EXTENSION, content)
            .await?;

        let asset = CachedAsset {
            key: key.clone(),
            location: content_path.to_string_lossy().into_owned(),
            size_bytes: content.len() as u64,
            stored_at: Utc::now(),
        };
        let metadata = serde_json::to_vec_pretty(&asset)?;
        self.write_atomic(&key, &self.metadata_path(&key), METADATA_EXTENSION, &metadata)
            .await?;

        debug!(key = %key, size = asset.size_bytes, "Stored asset in local cache");
        Ok(asset)
    }
}
