//! Wire types for the HTTP provider API.

use serde::{Deserialize, Serialize};

use vgen_models::QualityProfile;

/// `POST /v1/generations` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    pub profile: QualityProfile,
    pub duration_secs: u32,
}

/// `POST /v1/generations` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// `GET /v1/generations/{task_id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// queued | running | succeeded | failed
    pub status: String,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /v1/account` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub can_submit: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn describe(&self, fallback: &str) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}
