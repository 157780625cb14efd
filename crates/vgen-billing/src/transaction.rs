//! Transactional credit reservation.
//!
//! `idle -> active -> {committed | rolled_back}`. A transaction is single-use.
//! Every mutating call takes the same async mutex, so concurrent
//! `add_pending` calls from parallel jobs are serialized and a commit never
//! interleaves with staging.
//!
//! # Commit atomicity
//!
//! Commit persists staged assets one by one and then deducts the reservation.
//! If anything fails, the assets saved so far are removed again and the
//! reservation is released. A removal that itself fails leaves the record in
//! the repository; those ids are returned as `orphaned` and logged at error
//! level. Commit is therefore all-or-nothing only when compensation succeeds.
//!
//! Jobs scheduled against a transaction hold a [`JobTicket`] until their
//! result has been staged. Commit refuses to run while any ticket is
//! outstanding, so a late asset can never miss the commit it was billed in.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use vgen_models::{AssetId, CreditContext, CreditOperationType, GeneratedAsset};
use vgen_storage::AssetRepository;

use crate::error::{BillingError, BillingResult};
use crate::ledger::CreditLedger;

/// Metric names.
pub mod names {
    /// Terminal transactions by result.
    pub const TRANSACTIONS_TOTAL: &str = "vgen_transactions_total";
}

/// Unique identifier for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Idle => "idle",
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub transaction_id: TransactionId,
    pub assets: Vec<GeneratedAsset>,
    pub credits_deducted: u64,
    pub balance_after: u64,
}

#[derive(Debug)]
struct Inner {
    state: TransactionState,
    reserved: u64,
    pending: Vec<GeneratedAsset>,
    context: CreditContext,
}

/// Marks one job whose result has not been staged yet.
///
/// Released by [`Transaction::settle`], or on drop if the job never got
/// that far.
#[derive(Debug)]
pub struct JobTicket {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Atomic credit reservation wrapping a batch of generations.
pub struct Transaction {
    id: TransactionId,
    ledger: Arc<dyn CreditLedger>,
    repository: Arc<dyn AssetRepository>,
    inner: Mutex<Inner>,
    in_flight: Arc<AtomicUsize>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

impl Transaction {
    /// Create an idle transaction.
    pub fn new(ledger: Arc<dyn CreditLedger>, repository: Arc<dyn AssetRepository>) -> Self {
        Self {
            id: TransactionId::new(),
            ledger,
            repository,
            inner: Mutex::new(Inner {
                state: TransactionState::Idle,
                reserved: 0,
                pending: Vec::new(),
                context: CreditContext::new(CreditOperationType::Generation, "Video generation"),
            }),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the description recorded in credit history on commit.
    pub fn with_context(mut self, context: CreditContext) -> Self {
        self.inner.get_mut().context = context;
        self
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    pub async fn reserved(&self) -> u64 {
        self.inner.lock().await.reserved
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Jobs holding a ticket that have not been settled.
    pub fn jobs_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Register a job whose result will be staged here.
    pub fn track_job(&self) -> JobTicket {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        JobTicket {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Stage a tracked job's asset (if it produced one) and release its
    /// ticket. The ticket is released under the same lock commit takes.
    pub async fn settle(
        &self,
        ticket: JobTicket,
        asset: Option<GeneratedAsset>,
    ) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        let staged = match asset {
            Some(asset) if inner.state == TransactionState::Active => {
                inner.pending.push(asset);
                Ok(())
            }
            Some(_) => Err(BillingError::invalid_state("add_pending", inner.state)),
            None => Ok(()),
        };
        drop(ticket);
        staged
    }

    /// Reserve `total_cost` and become active.
    pub async fn begin(&self, total_cost: u64) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Idle {
            return Err(BillingError::invalid_state("begin", inner.state));
        }

        self.ledger.reserve(total_cost).await?;
        inner.reserved = total_cost;
        inner.state = TransactionState::Active;

        info!(transaction_id = %self.id, reserved = total_cost, "Transaction started");
        Ok(())
    }

    /// Stage a generated asset for commit.
    pub async fn add_pending(&self, asset: GeneratedAsset) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return Err(BillingError::invalid_state("add_pending", inner.state));
        }
        inner.pending.push(asset);
        Ok(())
    }

    /// Persist every staged asset, then deduct the reservation.
    pub async fn commit(&self) -> BillingResult<CommitReceipt> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return Err(BillingError::invalid_state("commit", inner.state));
        }
        let in_flight = self.jobs_in_flight();
        if in_flight > 0 {
            return Err(BillingError::JobsInFlight { in_flight });
        }

        let mut saved: Vec<AssetId> = Vec::with_capacity(inner.pending.len());
        let mut failure = None;
        for asset in &inner.pending {
            if let Err(e) = self.repository.save(asset).await {
                failure = Some(format!("failed to persist asset {}: {}", asset.id, e));
                break;
            }
            saved.push(asset.id.clone());
        }
        if let Some(reason) = failure {
            return Err(self.abort_commit(&mut inner, saved, reason).await);
        }

        let amount = inner.reserved;
        let context = inner
            .context
            .clone()
            .with_entry("asset_count", inner.pending.len().to_string());
        let balance_after = match self.ledger.deduct(self.id.as_str(), amount, &context).await {
            Ok(balance) => balance,
            Err(e) => {
                let reason = format!("failed to deduct {} credits: {}", amount, e);
                return Err(self.abort_commit(&mut inner, saved, reason).await);
            }
        };

        inner.state = TransactionState::Committed;
        inner.reserved = 0;
        let assets = std::mem::take(&mut inner.pending);
        counter!(names::TRANSACTIONS_TOTAL, "result" => "committed").increment(1);

        info!(
            transaction_id = %self.id,
            assets = assets.len(),
            credits = amount,
            balance_after,
            "Transaction committed"
        );

        Ok(CommitReceipt {
            transaction_id: self.id.clone(),
            assets,
            credits_deducted: amount,
            balance_after,
        })
    }

    /// Discard staged assets and release the reservation.
    pub async fn rollback(&self) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return Err(BillingError::invalid_state("rollback", inner.state));
        }

        let discarded = inner.pending.len();
        let release = self.release_locked(&mut inner).await;
        counter!(names::TRANSACTIONS_TOTAL, "result" => "rolled_back").increment(1);
        info!(transaction_id = %self.id, discarded, "Transaction rolled back");
        release
    }

    /// Undo a partial commit and roll back. Returns the error to surface.
    async fn abort_commit(
        &self,
        inner: &mut Inner,
        saved: Vec<AssetId>,
        reason: String,
    ) -> BillingError {
        warn!(
            transaction_id = %self.id,
            persisted = saved.len(),
            reason = %reason,
            "Commit failed, compensating"
        );

        let persisted = saved.len();
        let mut orphaned = Vec::new();
        for id in saved {
            if let Err(e) = self.repository.remove(&id).await {
                error!(
                    transaction_id = %self.id,
                    asset_id = %id,
                    error = %e,
                    "Failed to remove persisted asset during commit rollback"
                );
                orphaned.push(id);
            }
        }

        if let Err(e) = self.release_locked(inner).await {
            error!(transaction_id = %self.id, error = %e, "Failed to release reservation");
        }
        counter!(names::TRANSACTIONS_TOTAL, "result" => "commit_failed").increment(1);

        BillingError::CommitFailed {
            reason,
            persisted,
            orphaned,
        }
    }

    /// Transition to rolled back and release the reservation.
    ///
    /// The state changes even if the ledger call fails, so the transaction
    /// never stays active.
    async fn release_locked(&self, inner: &mut Inner) -> BillingResult<()> {
        inner.pending.clear();
        inner.state = TransactionState::RolledBack;
        let amount = std::mem::take(&mut inner.reserved);
        self.ledger.release(amount).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state != TransactionState::Active {
            return;
        }

        let amount = std::mem::take(&mut inner.reserved);
        inner.state = TransactionState::RolledBack;
        warn!(
            transaction_id = %self.id,
            reserved = amount,
            "Transaction dropped while active, releasing reservation"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ledger = Arc::clone(&self.ledger);
                let id = self.id.clone();
                handle.spawn(async move {
                    if let Err(e) = ledger.release(amount).await {
                        error!(transaction_id = %id, error = %e, "Failed to release dropped reservation");
                    }
                });
            }
            Err(_) => {
                error!(
                    transaction_id = %self.id,
                    reserved = amount,
                    "No runtime available to release dropped reservation"
                );
            }
        }
    }
}
