//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for generation jobs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vgen_models::{PromptId, QualityProfile};

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the prompt ID and quality profile; provider and
/// attempt are passed at the call site because they change during a job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    prompt_id: String,
    profile: QualityProfile,
}

impl JobLogger {
    pub fn new(prompt_id: &PromptId, profile: QualityProfile) -> Self {
        Self {
            prompt_id: prompt_id.to_string(),
            profile,
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, message: &str) {
        info!(
            prompt_id = %self.prompt_id,
            profile = %self.profile,
            "Job started: {}", message
        );
    }

    /// Log an attempt against a provider.
    pub fn log_attempt(&self, provider: &str, attempt: u32) {
        info!(
            prompt_id = %self.prompt_id,
            provider = %provider,
            attempt,
            "Submitting to provider"
        );
    }

    /// Log a retry after a failed attempt.
    pub fn log_retry(&self, provider: &str, attempt: u32, delay_secs: f64, error: &str) {
        warn!(
            prompt_id = %self.prompt_id,
            provider = %provider,
            attempt,
            delay_secs,
            error = %error,
            "Attempt failed, retrying"
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            prompt_id = %self.prompt_id,
            profile = %self.profile,
            "Job warning: {}", message
        );
    }

    /// Log a terminal failure.
    pub fn log_error(&self, attempts: u32, message: &str) {
        error!(
            prompt_id = %self.prompt_id,
            profile = %self.profile,
            attempts,
            "Job failed: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, cached: bool, attempts: u32) {
        info!(
            prompt_id = %self.prompt_id,
            profile = %self.profile,
            cached,
            attempts,
            "Job completed"
        );
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "generation_job",
            prompt_id = %self.prompt_id,
            profile = %self.profile
        )
    }
}
