//! Orchestrator facade: transactions, batch scheduling and the progress feed.

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use vgen_billing::{
    BillingError, CommitReceipt, CreditLedger, Transaction, TransactionId,
};
use vgen_models::{
    CostBreakdown, CreditContext, CreditCostTable, CreditOperationType, JobResult, ProgressEvent,
    Prompt, PromptId,
};
use vgen_provider::Provider;
use vgen_queue::{BroadcastProgress, FanoutProgress, JobStatusBoard, ProgressSink};
use vgen_storage::{AssetCache, AssetRepository};

use crate::capacity::{CapacityProbe, SystemCapacity};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::generation::{JobContext, ProviderChain};
use crate::scheduler::{BatchHandle, BatchScheduler};
use crate::single_flight::SingleFlight;

/// How a batch's transaction ended.
#[derive(Debug, Clone)]
pub enum Settlement {
    Committed(CommitReceipt),
    RolledBack { reason: String },
}

/// Outcome of [`Orchestrator::run_batch`].
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub transaction_id: TransactionId,
    /// Per-prompt results in completion order
    pub results: Vec<JobResult>,
    pub settlement: Settlement,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_completed())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.completed()
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.settlement, Settlement::Committed(_))
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: WorkerConfig,
    cache: Option<Arc<dyn AssetCache>>,
    primary: Option<Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
    ledger: Option<Arc<dyn CreditLedger>>,
    repository: Option<Arc<dyn AssetRepository>>,
    capacity: Option<Arc<dyn CapacityProbe>>,
    sinks: Vec<Arc<dyn ProgressSink>>,
    costs: CreditCostTable,
}

impl OrchestratorBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            cache: None,
            primary: None,
            fallback: None,
            ledger: None,
            repository: None,
            capacity: None,
            sinks: Vec::new(),
            costs: CreditCostTable::default(),
        }
    }

    pub fn cache(mut self, cache: Arc<dyn AssetCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn primary(mut self, provider: Arc<dyn Provider>) -> Self {
        self.primary = Some(provider);
        self
    }

    pub fn fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn CreditLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn AssetRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Probe used when no fixed budget is configured.
    pub fn capacity(mut self, probe: Arc<dyn CapacityProbe>) -> Self {
        self.capacity = Some(probe);
        self
    }

    /// Extra progress sink (e.g. Redis) alongside the built-in feed.
    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn costs(mut self, costs: CreditCostTable) -> Self {
        self.costs = costs;
        self
    }

    pub fn build(self) -> WorkerResult<Orchestrator> {
        let primary = self.primary.ok_or(WorkerError::NoProviderAvailable)?;
        let cache = self
            .cache
            .ok_or_else(|| WorkerError::config_error("cache not configured"))?;
        let ledger = self
            .ledger
            .ok_or_else(|| WorkerError::config_error("credit ledger not configured"))?;
        let repository = self
            .repository
            .ok_or_else(|| WorkerError::config_error("asset repository not configured"))?;

        let concurrency = match self.config.max_concurrent_jobs {
            Some(fixed) => fixed.max(1),
            None => {
                let probe = self.capacity.unwrap_or_else(|| {
                    Arc::new(SystemCapacity::new(
                        self.config.memory_per_job_mb,
                        self.config.max_capacity,
                    ))
                });
                probe.recommended_concurrency().max(1)
            }
        };

        let mut providers = ProviderChain::new(primary);
        if let Some(fallback) = self.fallback {
            providers = providers.with_fallback(fallback);
        }

        let feed = BroadcastProgress::default();
        let board = Arc::new(JobStatusBoard::new());
        let mut fanout = FanoutProgress::new()
            .with_sink(Arc::new(feed.clone()))
            .with_sink(board.clone());
        for sink in self.sinks {
            fanout = fanout.with_sink(sink);
        }

        let ctx = Arc::new(JobContext {
            cache,
            providers,
            progress: Arc::new(fanout),
            retry: self.config.retry_policy(),
            poll_interval: self.config.poll_interval,
            poll_timeout: self.config.poll_timeout,
            flights: SingleFlight::new(),
        });

        info!(
            concurrency,
            primary = %ctx.providers.primary().name(),
            fallback = ?ctx.providers.fallback().map(|p| p.name().to_string()),
            max_attempts = self.config.max_attempts,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            scheduler: BatchScheduler::new(ctx, concurrency),
            ledger,
            repository,
            feed,
            board,
            costs: self.costs,
        })
    }
}

/// Entry point for callers: reserve credits, run batches, settle.
pub struct Orchestrator {
    scheduler: BatchScheduler,
    ledger: Arc<dyn CreditLedger>,
    repository: Arc<dyn AssetRepository>,
    feed: BroadcastProgress,
    board: Arc<JobStatusBoard>,
    costs: CreditCostTable,
}

impl Orchestrator {
    pub fn builder(config: WorkerConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn concurrency(&self) -> usize {
        self.scheduler.concurrency()
    }

    pub fn estimate_cost(&self, prompts: &[Prompt]) -> CostBreakdown {
        self.costs.estimate(prompts)
    }

    /// Reserve `cost` credits in a new active transaction.
    pub async fn begin_transaction(&self, cost: u64) -> WorkerResult<Arc<Transaction>> {
        let context = CreditContext::new(CreditOperationType::Generation, "Video generation");
        self.begin_with_context(cost, context).await
    }

    async fn begin_with_context(
        &self,
        cost: u64,
        context: CreditContext,
    ) -> WorkerResult<Arc<Transaction>> {
        let transaction = Transaction::new(Arc::clone(&self.ledger), Arc::clone(&self.repository))
            .with_context(context);
        transaction.begin(cost).await?;
        Ok(Arc::new(transaction))
    }

    /// Start a batch whose completed assets are staged on `transaction`.
    pub fn schedule_batch(&self, prompts: Vec<Prompt>, transaction: &Arc<Transaction>) -> BatchHandle {
        self.scheduler
            .schedule(prompts, Some(Arc::clone(transaction)))
    }

    /// Start a batch without billing.
    pub fn schedule_unbilled(&self, prompts: Vec<Prompt>) -> BatchHandle {
        self.scheduler.schedule(prompts, None)
    }

    pub async fn commit(&self, transaction: &Transaction) -> WorkerResult<CommitReceipt> {
        Ok(transaction.commit().await?)
    }

    pub async fn rollback(&self, transaction: &Transaction) -> WorkerResult<()> {
        Ok(transaction.rollback().await?)
    }

    /// Reserve, generate, then commit (or roll back when nothing completed
    /// or the commit fails). `cost` defaults to the cost table estimate.
    ///
    /// The whole reservation is deducted when at least one prompt completes.
    pub async fn run_batch(&self, prompts: Vec<Prompt>, cost: Option<u64>) -> WorkerResult<BatchReport> {
        let breakdown = self.estimate_cost(&prompts);
        let cost = cost.unwrap_or(breakdown.total);
        let context = CreditContext::new(CreditOperationType::Generation, breakdown.to_description())
            .with_entry("prompt_count", prompts.len().to_string());

        let transaction = self.begin_with_context(cost, context).await?;
        let transaction_id = transaction.id().clone();
        info!(transaction_id = %transaction_id, cost, prompts = prompts.len(), "Running batch");

        let results = self.schedule_batch(prompts, &transaction).collect_all().await;
        let completed = results.iter().filter(|r| r.outcome.is_completed()).count();

        let settlement = if completed == 0 {
            warn!(transaction_id = %transaction_id, "No prompt completed, rolling back");
            self.rollback(&transaction).await?;
            Settlement::RolledBack {
                reason: "No prompt completed".to_string(),
            }
        } else {
            match transaction.commit().await {
                Ok(receipt) => Settlement::Committed(receipt),
                Err(e @ BillingError::CommitFailed { .. }) => {
                    error!(transaction_id = %transaction_id, error = %e, "Batch commit failed");
                    Settlement::RolledBack {
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(BatchReport {
            transaction_id,
            results,
            settlement,
        })
    }

    /// Progress events for one prompt.
    pub fn subscribe_progress(&self, prompt_id: &PromptId) -> BoxStream<'static, ProgressEvent> {
        self.feed.subscribe_job(prompt_id)
    }

    /// Progress events for every prompt.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.feed.subscribe()
    }

    /// Latest known state per prompt.
    pub fn status_board(&self) -> &JobStatusBoard {
        &self.board
    }
}
