//! Generation job states and terminal outcomes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CachedAsset, PromptId};

/// State of a single generation job.
///
/// `checking_cache -> creating_task -> waiting -> processing -> downloading -> completed`,
/// with `failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Looking up the cache key
    #[default]
    CheckingCache,
    /// Submitting the prompt to a provider
    CreatingTask,
    /// Task accepted, not yet running on the provider
    Waiting,
    /// Provider reports the task as running
    Processing,
    /// Materializing the remote result into the cache
    Downloading,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::CheckingCache => "checking_cache",
            JobState::CreatingTask => "creating_task",
            JobState::Waiting => "waiting",
            JobState::Processing => "processing",
            JobState::Downloading => "downloading",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Check if the job holds a concurrency slot in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::CreatingTask | JobState::Waiting | JobState::Processing | JobState::Downloading
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries (and fallback, if any) exhausted on retryable errors
    MaxRetriesExceeded,
    /// Authorization or permission error
    Unauthorized,
    /// Quota or resource exhaustion
    QuotaExceeded,
    /// Eligibility or input validation failure
    Validation,
    /// Batch was cancelled before the job finished
    Cancelled,
    /// Unexpected internal error (e.g. a panic inside the job)
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MaxRetriesExceeded => "max_retries_exceeded",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::Validation => "validation",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of a generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        asset: CachedAsset,
        cached: bool,
        /// Attempts made against the provider that produced the asset (0 for cache hits)
        attempts: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
    Failed {
        reason: String,
        kind: FailureKind,
        /// Attempts made against the last provider tried
        attempts: u32,
    },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JobOutcome::Completed { attempts, .. } | JobOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Terminal state matching this outcome.
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed { .. } => JobState::Completed,
            JobOutcome::Failed { .. } => JobState::Failed,
        }
    }
}

/// A terminal result correlated to its prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub prompt_id: PromptId,
    pub sequence: u32,
    pub outcome: JobOutcome,
}
