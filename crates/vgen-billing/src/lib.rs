//! Credit ledger and transactional credit reservation.
//!
//! A [`Transaction`] reserves credits up front, stages generated assets
//! while a batch runs, then either commits (persist + deduct) or rolls back
//! (discard + release) as a unit.

pub mod error;
pub mod ledger;
pub mod transaction;

pub use error::{BillingError, BillingResult};
pub use ledger::{CreditLedger, InMemoryLedger};
pub use transaction::{CommitReceipt, JobTicket, Transaction, TransactionId, TransactionState};
