//! Shared data models for the video generation orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Prompts and quality profiles
//! - Generation job states and terminal outcomes
//! - Cache keys, cached assets and generated assets
//! - Progress events for status rendering
//! - Credit transactions and cost estimation

pub mod asset;
pub mod credit_cost;
pub mod credit_transaction;
pub mod job;
pub mod progress;
pub mod prompt;

// Re-export common types
pub use asset::{AssetId, CacheKey, CachedAsset, GeneratedAsset, CACHE_KEY_VERSION};
pub use credit_cost::{CostBreakdown, CreditCostTable};
pub use credit_transaction::{CreditContext, CreditOperationType, CreditTransaction};
pub use job::{FailureKind, JobOutcome, JobResult, JobState};
pub use progress::ProgressEvent;
pub use prompt::{Prompt, PromptId, QualityProfile, QualityProfileParseError};
