//! Progress events emitted by generation jobs.
//!
//! Every state transition produces one event. Events for one prompt carry a
//! monotonically increasing `seq` so consumers can detect reordering.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobState, PromptId};

/// A single state-machine transition (or intermediate provider status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    /// Prompt / job ID
    #[serde(rename = "promptId")]
    pub prompt_id: PromptId,
    /// Per-job sequence number (starts at 1)
    pub seq: u64,
    /// State after the transition
    pub state: JobState,
    /// Attempt counter for the active provider
    pub attempt: u32,
    /// Active provider name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider-reported status, failure reason, or other detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Provider-reported progress (0-100), if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(prompt_id: PromptId, seq: u64, state: JobState) -> Self {
        Self {
            prompt_id,
            seq,
            state,
            attempt: 0,
            provider: None,
            detail: None,
            percent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_percent(mut self, percent: Option<u8>) -> Self {
        self.percent = percent.map(|p| p.min(100));
        self
    }
}
