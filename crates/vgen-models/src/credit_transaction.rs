//! Credit transaction data models.
//!
//! Each committed generation transaction records when credits were deducted,
//! for what operation, and the resulting balance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Type of credit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CreditOperationType {
    /// Batch or single-prompt video generation
    Generation,
}

/// A credit transaction record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreditTransaction {
    /// Unique identifier for this record (UUID)
    pub id: String,

    /// Reservation transaction that produced this record
    pub transaction_id: String,

    /// When the deduction happened
    pub timestamp: DateTime<Utc>,

    /// Type of operation that consumed credits
    pub operation_type: CreditOperationType,

    /// Number of credits deducted
    pub credits_amount: u64,

    /// Human-readable description of the operation
    pub description: String,

    /// Balance after this transaction
    pub balance_after: u64,

    /// Additional metadata (e.g. asset count)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl CreditTransaction {
    pub fn new(
        transaction_id: impl Into<String>,
        context: &CreditContext,
        credits_amount: u64,
        balance_after: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_id: transaction_id.into(),
            timestamp: Utc::now(),
            operation_type: context.operation_type,
            credits_amount,
            description: context.description.clone(),
            balance_after,
            metadata: context.metadata.clone(),
        }
    }
}

/// Context for recording a credit deduction.
#[derive(Debug, Clone)]
pub struct CreditContext {
    pub operation_type: CreditOperationType,
    pub description: String,
    pub metadata: Option<HashMap<String, String>>,
}

impl CreditContext {
    pub fn new(operation_type: CreditOperationType, description: impl Into<String>) -> Self {
        Self {
            operation_type,
            description: description.into(),
            metadata: None,
        }
    }

    /// Add a single metadata entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}
