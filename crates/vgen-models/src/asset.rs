//! Asset and cache key models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::{PromptId, QualityProfile};

/// Bump when the key derivation changes so old entries read as misses.
pub const CACHE_KEY_VERSION: &str = "v1";

/// Content address for a (prompt text, quality profile) pair.
///
/// Derivation: SHA-256 over `"{version}\n{profile}\n{trimmed text}"`,
/// lowercase hex. Identical text and profile always map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a prompt text and profile.
    pub fn derive(prompt_text: &str, profile: QualityProfile) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(CACHE_KEY_VERSION.as_bytes());
        hasher.update(b"\n");
        hasher.update(profile.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(prompt_text.trim().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already-derived key (e.g. read back from an index file).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved asset location stored under a cache key.
///
/// Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CachedAsset {
    /// Key the asset was stored under
    pub key: CacheKey,
    /// Local path or URI of the asset
    pub location: String,
    /// Size of the stored content in bytes
    pub size_bytes: u64,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
}

/// Unique identifier for a generated asset record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    /// Generate a new random asset ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output of a completed generation job, staged in a transaction until commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedAsset {
    /// Asset record ID
    pub id: AssetId,
    /// Prompt that produced the asset
    pub prompt_id: PromptId,
    /// Sequence index of the prompt
    pub sequence: u32,
    /// Cache key the content lives under
    pub cache_key: CacheKey,
    /// Resolved location
    pub location: String,
    /// Profile used for generation
    pub profile: QualityProfile,
    /// Target duration in seconds
    pub duration_secs: u32,
    /// True when served from cache with no provider cost
    pub cached: bool,
    /// Provider that produced the asset (None for cache hits)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}
