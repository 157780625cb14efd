//! Provider contract.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vgen_models::{Prompt, QualityProfile};

use crate::error::ProviderResult;

/// What a provider is asked to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub profile: QualityProfile,
    pub duration_secs: u32,
}

impl From<&Prompt> for GenerationRequest {
    fn from(prompt: &Prompt) -> Self {
        Self {
            prompt: prompt.text.clone(),
            profile: prompt.profile,
            duration_secs: prompt.duration_secs,
        }
    }
}

/// Opaque handle to a submitted remote task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task_id)
    }
}

/// Coarse phase of a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Queued,
    Running,
}

/// Intermediate status, used only for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStatus {
    pub phase: TaskPhase,
    pub message: Option<String>,
    pub progress: Option<u8>,
}

impl PendingStatus {
    pub fn queued() -> Self {
        Self {
            phase: TaskPhase::Queued,
            message: None,
            progress: None,
        }
    }

    pub fn running(progress: Option<u8>) -> Self {
        Self {
            phase: TaskPhase::Running,
            message: None,
            progress,
        }
    }
}

/// Result of polling a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending(PendingStatus),
    Succeeded { location: String },
    Failed { reason: String },
}

/// External capability that turns a prompt into a remote video asset.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used in logs, progress events and asset records.
    fn name(&self) -> &str;

    /// Eligibility check run before every submission.
    async fn validate(&self, _request: &GenerationRequest) -> ProviderResult<()> {
        Ok(())
    }

    /// Submit a request and return the remote task handle.
    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<TaskHandle>;

    /// Poll a previously submitted task.
    async fn poll(&self, handle: &TaskHandle) -> ProviderResult<TaskStatus>;

    /// Fetch the content behind a location returned by a successful poll.
    async fn download(&self, location: &str) -> ProviderResult<Vec<u8>>;
}
