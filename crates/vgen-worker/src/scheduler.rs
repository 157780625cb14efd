//! Concurrency-bounded batch scheduler.
//!
//! All prompts are spawned at once; a semaphore sized to the concurrency
//! budget gates the provider phase, so a finished job's slot is immediately
//! backfilled by whichever queued job acquires it next. Results are yielded
//! in completion order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use vgen_billing::{JobTicket, Transaction};
use vgen_models::{
    AssetId, FailureKind, GeneratedAsset, JobOutcome, JobResult, JobState, Prompt,
};

use crate::cancel::{cancel_pair, CancelHandle};
use crate::generation::{GenerationJob, JobContext, JobSlot};

/// Dispatches generation jobs against a shared [`JobContext`].
pub struct BatchScheduler {
    ctx: Arc<JobContext>,
    concurrency: usize,
}

impl BatchScheduler {
    pub fn new(ctx: Arc<JobContext>, concurrency: usize) -> Self {
        Self {
            ctx,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start every prompt and return a handle yielding one result per prompt.
    ///
    /// Each job is tracked on `transaction` before this returns and its
    /// completed asset is staged before its result is delivered, so
    /// `commit` is refused until every job of the batch has settled.
    pub fn schedule(
        &self,
        prompts: Vec<Prompt>,
        transaction: Option<Arc<Transaction>>,
    ) -> BatchHandle {
        let total = prompts.len();
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let (cancel_handle, cancel) = cancel_pair();
        let (results_tx, results_rx) = mpsc::channel(total.max(1));

        info!(
            prompts = total,
            concurrency = self.concurrency,
            "Scheduling batch"
        );

        for prompt in prompts {
            let job = GenerationJob::new(prompt.clone(), Arc::clone(&self.ctx), cancel.clone());
            let slots = Arc::clone(&slots);
            let results_tx = results_tx.clone();
            let staging = transaction
                .as_ref()
                .map(|tx| (Arc::clone(tx), tx.track_job()));

            tokio::spawn(async move {
                let mut result = run_isolated(job, slots).await;

                if let Some((transaction, ticket)) = staging {
                    result = stage(&transaction, ticket, &prompt, result).await;
                }

                if results_tx.send(result).await.is_err() {
                    debug!(prompt_id = %prompt.id, "Batch handle dropped, result discarded");
                }
            });
        }

        BatchHandle {
            results: results_rx,
            cancel: cancel_handle,
            total,
            received: 0,
        }
    }
}

/// Run a job, converting a panic into a failed result for that prompt only.
///
/// The job's slot is released only after its terminal event is published,
/// including when the job panicked.
async fn run_isolated(job: GenerationJob, slots: Arc<Semaphore>) -> JobResult {
    let prompt_id = job.prompt().id.clone();
    let sequence = job.prompt().sequence;
    let progress = job.progress();
    let slot = JobSlot::default();

    let outcome = AssertUnwindSafe(job.run(slots, slot.clone()))
        .catch_unwind()
        .await;
    let result = match outcome {
        Ok(result) => result,
        Err(panic) => {
            let reason = format!("Job panicked: {}", panic_message(panic.as_ref()));
            error!(prompt_id = %prompt_id, reason = %reason, "Generation job panicked");

            let detail = reason.clone();
            progress
                .emit(JobState::Failed, |event| event.with_detail(detail))
                .await;

            JobResult {
                prompt_id,
                sequence,
                outcome: JobOutcome::Failed {
                    reason,
                    kind: FailureKind::Internal,
                    attempts: 0,
                },
            }
        }
    };
    slot.release();
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Stage a completed result on the transaction and settle the job's ticket.
///
/// An asset the transaction refuses (it was already rolled back) is not
/// delivered: the result is downgraded to a failure.
async fn stage(
    transaction: &Transaction,
    ticket: JobTicket,
    prompt: &Prompt,
    result: JobResult,
) -> JobResult {
    let asset = generated_asset(prompt, &result);
    match transaction.settle(ticket, asset).await {
        Ok(()) => result,
        Err(e) => {
            warn!(
                prompt_id = %prompt.id,
                transaction_id = %transaction.id(),
                error = %e,
                "Could not stage generated asset"
            );
            let attempts = match &result.outcome {
                JobOutcome::Completed { attempts, .. } | JobOutcome::Failed { attempts, .. } => {
                    *attempts
                }
            };
            JobResult {
                outcome: JobOutcome::Failed {
                    reason: format!("Asset not staged: {}", e),
                    kind: FailureKind::Internal,
                    attempts,
                },
                ..result
            }
        }
    }
}

fn generated_asset(prompt: &Prompt, result: &JobResult) -> Option<GeneratedAsset> {
    match &result.outcome {
        JobOutcome::Completed {
            asset,
            cached,
            provider,
            ..
        } => Some(GeneratedAsset {
            id: AssetId::new(),
            prompt_id: result.prompt_id.clone(),
            sequence: result.sequence,
            cache_key: asset.key.clone(),
            location: asset.location.clone(),
            profile: prompt.profile,
            duration_secs: prompt.duration_secs,
            cached: *cached,
            provider: provider.clone(),
            created_at: Utc::now(),
        }),
        JobOutcome::Failed { .. } => None,
    }
}

/// Receiving end of a scheduled batch.
pub struct BatchHandle {
    results: mpsc::Receiver<JobResult>,
    cancel: CancelHandle,
    total: usize,
    received: usize,
}

impl BatchHandle {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.total - self.received
    }

    /// Stop jobs that have not started generating and interrupt waits.
    /// Every prompt still yields a result.
    pub fn cancel(&self) {
        info!(remaining = self.remaining(), "Cancelling batch");
        self.cancel.cancel();
    }

    /// Next result in completion order. `None` once every prompt reported.
    pub async fn next(&mut self) -> Option<JobResult> {
        let result = self.results.recv().await;
        if result.is_some() {
            self.received += 1;
        }
        result
    }

    pub async fn collect_all(mut self) -> Vec<JobResult> {
        let mut results = Vec::with_capacity(self.total);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }

    pub fn into_stream(self) -> BoxStream<'static, JobResult> {
        stream::unfold(self, |mut handle| async move {
            handle.next().await.map(|result| (result, handle))
        })
        .boxed()
    }
}
