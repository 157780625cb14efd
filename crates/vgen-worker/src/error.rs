//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No provider available")]
    NoProviderAvailable,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Billing error: {0}")]
    Billing(#[from] vgen_billing::BillingError),

    #[error("Storage error: {0}")]
    Storage(#[from] vgen_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] vgen_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the error is a failed credit reservation.
    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, WorkerError::Billing(e) if e.is_insufficient_credits())
    }
}
