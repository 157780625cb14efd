//! Provider error types.
//!
//! The classification helpers here drive the retry and fallback policy of
//! generation jobs.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Generation task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl ProviderError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Transient failures worth another attempt against the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::Unavailable(_)
                | ProviderError::TaskFailed(_)
                | ProviderError::InvalidResponse(_)
        )
    }

    /// Whether switching to a different provider could help.
    ///
    /// Validation failures describe the request itself and fail everywhere.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, ProviderError::Validation(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(0)
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::network("reset").is_retryable());
        assert!(ProviderError::Timeout(300).is_retryable());
        assert!(ProviderError::unavailable("503").is_retryable());
        assert!(ProviderError::task_failed("gpu oom").is_retryable());

        assert!(!ProviderError::unauthorized("bad key").is_retryable());
        assert!(!ProviderError::quota_exceeded("limit").is_retryable());
        assert!(!ProviderError::validation("empty prompt").is_retryable());
    }

    #[test]
    fn test_fallback_classification() {
        assert!(ProviderError::unauthorized("bad key").allows_fallback());
        assert!(ProviderError::quota_exceeded("limit").allows_fallback());
        assert!(ProviderError::network("reset").allows_fallback());
        assert!(!ProviderError::validation("too long").allows_fallback());
    }
}
