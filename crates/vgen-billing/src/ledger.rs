//! Credit ledger contract and in-memory implementation.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use vgen_models::{CreditContext, CreditTransaction};

use crate::error::{BillingError, BillingResult};

/// Credit balance query/deduct pair used by transactions.
///
/// `reserve` must be atomic with respect to concurrent reservations: two
/// reservations may never jointly exceed the balance.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Total balance, including reserved credits.
    async fn balance(&self) -> BillingResult<u64>;

    /// Balance minus outstanding reservations.
    async fn available(&self) -> BillingResult<u64>;

    /// Set credits aside without deducting them.
    async fn reserve(&self, amount: u64) -> BillingResult<()>;

    /// Return reserved credits to the available pool.
    async fn release(&self, amount: u64) -> BillingResult<()>;

    /// Convert a reservation into a deduction. Returns the balance after.
    async fn deduct(
        &self,
        transaction_id: &str,
        amount: u64,
        context: &CreditContext,
    ) -> BillingResult<u64>;
}

#[derive(Debug, Default)]
struct LedgerState {
    balance: u64,
    reserved: u64,
    history: Vec<CreditTransaction>,
}

/// Ledger held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(balance: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                balance,
                ..Default::default()
            }),
        }
    }

    /// Credits currently reserved by active transactions.
    pub fn reserved(&self) -> u64 {
        self.state.lock().map(|s| s.reserved).unwrap_or(0)
    }

    /// Recorded deductions, oldest first.
    pub fn history(&self) -> Vec<CreditTransaction> {
        self.state
            .lock()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> BillingResult<std::sync::MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| BillingError::ledger("ledger lock poisoned"))
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn balance(&self) -> BillingResult<u64> {
        Ok(self.lock()?.balance)
    }

    async fn available(&self) -> BillingResult<u64> {
        let state = self.lock()?;
        Ok(state.balance.saturating_sub(state.reserved))
    }

    async fn reserve(&self, amount: u64) -> BillingResult<()> {
        let mut state = self.lock()?;
        let available = state.balance.saturating_sub(state.reserved);
        if amount > available {
            return Err(BillingError::InsufficientCredits {
                required: amount,
                available,
            });
        }
        state.reserved += amount;
        debug!(amount, reserved = state.reserved, "Reserved credits");
        Ok(())
    }

    async fn release(&self, amount: u64) -> BillingResult<()> {
        let mut state = self.lock()?;
        if amount > state.reserved {
            return Err(BillingError::ledger(format!(
                "cannot release {} credits, only {} reserved",
                amount, state.reserved
            )));
        }
        state.reserved -= amount;
        debug!(amount, reserved = state.reserved, "Released credits");
        Ok(())
    }

    async fn deduct(
        &self,
        transaction_id: &str,
        amount: u64,
        context: &CreditContext,
    ) -> BillingResult<u64> {
        let mut state = self.lock()?;
        if amount > state.reserved || amount > state.balance {
            return Err(BillingError::ledger(format!(
                "cannot deduct {} credits (reserved {}, balance {})",
                amount, state.reserved, state.balance
            )));
        }
        state.reserved -= amount;
        state.balance -= amount;
        let balance_after = state.balance;
        state
            .history
            .push(CreditTransaction::new(transaction_id, context, amount, balance_after));

        info!(
            transaction_id = %transaction_id,
            credits = amount,
            balance_after,
            "Deducted credits"
        );
        Ok(balance_after)
    }
}
