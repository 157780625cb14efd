//! Billing error types.

use thiserror::Error;

use vgen_models::AssetId;

use crate::transaction::TransactionState;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Insufficient credits: need {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Invalid transaction state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: TransactionState,
    },

    #[error("Cannot commit while {in_flight} job(s) are still running")]
    JobsInFlight { in_flight: usize },

    #[error("Commit failed after persisting {persisted} asset(s): {reason}")]
    CommitFailed {
        reason: String,
        /// Assets saved before the failure
        persisted: usize,
        /// Saved assets whose compensating removal also failed
        orphaned: Vec<AssetId>,
    },

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl BillingError {
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    pub fn invalid_state(operation: &'static str, state: TransactionState) -> Self {
        Self::InvalidState { operation, state }
    }

    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, BillingError::InsufficientCredits { .. })
    }
}
