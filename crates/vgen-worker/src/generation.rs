//! Per-prompt generation state machine.
//!
//! `checking_cache -> creating_task -> waiting -> processing -> downloading
//! -> completed`, with `failed` reachable from every non-terminal state.
//!
//! A job holds a concurrency slot from `creating_task` until its terminal
//! event has been published. Cache hits never take a slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{warn, Instrument};

use vgen_models::{
    CacheKey, CachedAsset, FailureKind, JobOutcome, JobResult, JobState, ProgressEvent, Prompt,
    PromptId,
};
use vgen_provider::{
    GenerationRequest, PendingStatus, Provider, ProviderError, TaskHandle, TaskPhase, TaskStatus,
};
use vgen_queue::ProgressSink;
use vgen_storage::{AssetCache, StorageError};

use crate::cancel::CancelSignal;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::single_flight::SingleFlight;

/// Primary provider plus an optional one-time fallback.
#[derive(Clone)]
pub struct ProviderChain {
    primary: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
}

impl ProviderChain {
    pub fn new(primary: Arc<dyn Provider>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Provider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn primary(&self) -> &Arc<dyn Provider> {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&Arc<dyn Provider>> {
        self.fallback.as_ref()
    }

    /// Providers in the order they are tried.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }
}

/// Collaborators shared by every job in an orchestrator.
pub struct JobContext {
    pub cache: Arc<dyn AssetCache>,
    pub providers: ProviderChain,
    pub progress: Arc<dyn ProgressSink>,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub flights: SingleFlight,
}

/// Holds a job's concurrency slot outside the job's own future.
///
/// The scheduler keeps a clone, so a job that panics still has its slot
/// until the scheduler has published the terminal event.
#[derive(Clone, Default)]
pub struct JobSlot {
    permit: Arc<Mutex<Option<OwnedSemaphorePermit>>>,
}

impl JobSlot {
    fn hold(&self, permit: OwnedSemaphorePermit) {
        let mut slot = self.permit.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(permit);
    }

    pub fn is_held(&self) -> bool {
        self.permit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Return the slot to the pool. No-op when nothing is held.
    pub fn release(&self) {
        let permit = self.permit.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(permit);
    }
}

/// Publishes one job's events with a monotonically increasing `seq`.
#[derive(Clone)]
pub(crate) struct JobProgress {
    prompt_id: PromptId,
    seq: Arc<AtomicU64>,
    sink: Arc<dyn ProgressSink>,
}

impl JobProgress {
    fn new(prompt_id: PromptId, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            prompt_id,
            seq: Arc::new(AtomicU64::new(0)),
            sink,
        }
    }

    pub(crate) async fn emit(
        &self,
        state: JobState,
        decorate: impl FnOnce(ProgressEvent) -> ProgressEvent,
    ) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = decorate(ProgressEvent::new(self.prompt_id.clone(), seq, state));
        if let Err(e) = self.sink.publish(&event).await {
            warn!(
                prompt_id = %self.prompt_id,
                seq,
                state = %state,
                error = %e,
                "Failed to publish progress event"
            );
        }
    }
}

/// Why a single attempt stopped.
#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Cache write failed: {0}")]
    CacheWrite(StorageError),

    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    fn is_retryable(&self) -> bool {
        match self {
            StepError::Provider(e) => e.is_retryable(),
            StepError::CacheWrite(_) => true,
            StepError::Cancelled => false,
        }
    }

    fn allows_fallback(&self) -> bool {
        match self {
            StepError::Provider(e) => e.allows_fallback(),
            StepError::CacheWrite(_) => true,
            StepError::Cancelled => false,
        }
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            StepError::Provider(ProviderError::Unauthorized(_)) => FailureKind::Unauthorized,
            StepError::Provider(ProviderError::QuotaExceeded(_)) => FailureKind::QuotaExceeded,
            StepError::Provider(ProviderError::Validation(_)) => FailureKind::Validation,
            StepError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::MaxRetriesExceeded,
        }
    }

    fn reason(&self) -> String {
        match self.failure_kind() {
            FailureKind::MaxRetriesExceeded => format!("Max retries exceeded: {}", self),
            _ => self.to_string(),
        }
    }
}

/// One prompt's generation job. Mutated only by its own driver.
pub struct GenerationJob {
    prompt: Prompt,
    ctx: Arc<JobContext>,
    cancel: CancelSignal,
    progress: JobProgress,
    logger: JobLogger,
    state: JobState,
    attempt: u32,
    provider: Option<String>,
    task: Option<TaskHandle>,
    started: Instant,
}

impl GenerationJob {
    pub fn new(prompt: Prompt, ctx: Arc<JobContext>, cancel: CancelSignal) -> Self {
        let progress = JobProgress::new(prompt.id.clone(), Arc::clone(&ctx.progress));
        let logger = JobLogger::new(&prompt.id, prompt.profile);
        Self {
            prompt,
            ctx,
            cancel,
            progress,
            logger,
            state: JobState::CheckingCache,
            attempt: 0,
            provider: None,
            task: None,
            started: Instant::now(),
        }
    }

    pub fn prompt(&self) -> &Prompt {
        &self.prompt
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn progress(&self) -> JobProgress {
        self.progress.clone()
    }

    /// Drive the job to a terminal result, taking a slot from `slots` into
    /// `slot` for the provider phase.
    pub async fn run(self, slots: Arc<Semaphore>, slot: JobSlot) -> JobResult {
        let span = self.logger.create_span();
        self.drive(slots, slot).instrument(span).await
    }

    async fn drive(mut self, slots: Arc<Semaphore>, slot: JobSlot) -> JobResult {
        self.logger
            .log_start(&format!("{} chars, {}s", self.prompt.text.len(), self.prompt.duration_secs));
        self.transition(JobState::CheckingCache).await;

        let ctx = Arc::clone(&self.ctx);
        let key = ctx.cache.key_for(&self.prompt.text, self.prompt.profile);

        if let Some(asset) = self.lookup_cache().await {
            return self.finish(Self::cache_hit(asset)).await;
        }

        let flight = tokio::select! {
            guard = ctx.flights.acquire(&key) => Some(guard),
            _ = self.cancel.cancelled() => None,
        };
        let Some(flight) = flight else {
            return self.finish(self.cancelled_outcome()).await;
        };

        // Another job generated this key while we waited
        if flight.waited {
            if let Some(asset) = self.lookup_cache().await {
                drop(flight);
                return self.finish(Self::cache_hit(asset)).await;
            }
        }

        let permit = tokio::select! {
            permit = Arc::clone(&slots).acquire_owned() => Some(permit),
            _ = self.cancel.cancelled() => None,
        };
        match permit {
            Some(Ok(permit)) => slot.hold(permit),
            Some(Err(_)) => {
                let outcome = JobOutcome::Failed {
                    reason: "Concurrency pool closed".to_string(),
                    kind: FailureKind::Internal,
                    attempts: 0,
                };
                return self.finish(outcome).await;
            }
            None => return self.finish(self.cancelled_outcome()).await,
        }

        let outcome = self.generate(&key).await;
        let result = self.finish(outcome).await;

        slot.release();
        drop(flight);
        result
    }

    /// Try each provider in the chain until one produces the asset.
    async fn generate(&mut self, key: &CacheKey) -> JobOutcome {
        let ctx = Arc::clone(&self.ctx);
        let mut last_error: Option<StepError> = None;

        for (index, provider) in ctx.providers.iter().enumerate() {
            if index > 0 {
                match &last_error {
                    Some(e) if e.allows_fallback() => {}
                    _ => break,
                }
                metrics::record_fallback();
                self.logger.log_warning(&format!(
                    "Falling back from {} to {}",
                    self.provider.as_deref().unwrap_or("unknown"),
                    provider.name()
                ));
            }

            self.provider = Some(provider.name().to_string());
            self.attempt = 0;

            match self.run_provider(provider.as_ref(), key).await {
                Ok(asset) => {
                    return JobOutcome::Completed {
                        asset,
                        cached: false,
                        attempts: self.attempt,
                        provider: self.provider.clone(),
                    }
                }
                Err(StepError::Cancelled) => return self.cancelled_outcome(),
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => JobOutcome::Failed {
                reason: e.reason(),
                kind: e.failure_kind(),
                attempts: self.attempt,
            },
            None => JobOutcome::Failed {
                reason: "No provider attempted".to_string(),
                kind: FailureKind::Internal,
                attempts: 0,
            },
        }
    }

    /// Attempt loop against one provider.
    async fn run_provider(
        &mut self,
        provider: &dyn Provider,
        key: &CacheKey,
    ) -> Result<CachedAsset, StepError> {
        let request = GenerationRequest::from(&self.prompt);

        loop {
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }

            self.attempt += 1;
            self.task = None;
            self.transition(JobState::CreatingTask).await;
            self.logger.log_attempt(provider.name(), self.attempt);

            let error = match self.attempt_once(provider, &request).await {
                Ok(asset) => {
                    if &asset.key != key {
                        self.logger.log_warning("Cache stored asset under an unexpected key");
                    }
                    return Ok(asset);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || !self.ctx.retry.should_retry(self.attempt) {
                return Err(error);
            }

            let delay = self.ctx.retry.delay_for_attempt(self.attempt);
            metrics::record_retry(provider.name());
            self.logger
                .log_retry(provider.name(), self.attempt, delay.as_secs_f64(), &error.to_string());
            self.sleep_or_cancel(delay).await?;
        }
    }

    /// Submit, poll, download and cache once.
    async fn attempt_once(
        &mut self,
        provider: &dyn Provider,
        request: &GenerationRequest,
    ) -> Result<CachedAsset, StepError> {
        provider.validate(request).await?;
        let handle = provider.submit(request).await?;
        self.task = Some(handle.clone());

        self.transition(JobState::Waiting).await;
        let location = self.await_task(provider, &handle).await?;

        self.transition(JobState::Downloading).await;
        let content = provider.download(&location).await?;

        let ctx = Arc::clone(&self.ctx);
        ctx.cache
            .store(&content, &self.prompt.text, self.prompt.profile)
            .await
            .map_err(StepError::CacheWrite)
    }

    /// Poll until the task settles or the poll timeout elapses.
    async fn await_task(
        &mut self,
        provider: &dyn Provider,
        handle: &TaskHandle,
    ) -> Result<String, StepError> {
        let timeout = self.ctx.poll_timeout;
        match tokio::time::timeout(timeout, self.poll_loop(provider, handle)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout.as_secs()).into()),
        }
    }

    async fn poll_loop(
        &mut self,
        provider: &dyn Provider,
        handle: &TaskHandle,
    ) -> Result<String, StepError> {
        loop {
            match provider.poll(handle).await? {
                TaskStatus::Succeeded { location } => return Ok(location),
                TaskStatus::Failed { reason } => {
                    return Err(ProviderError::task_failed(reason).into());
                }
                TaskStatus::Pending(status) => {
                    if status.phase == TaskPhase::Running && self.state == JobState::Waiting {
                        self.state = JobState::Processing;
                    }
                    self.publish_status(&status).await;
                }
            }
            let interval = self.ctx.poll_interval;
            self.sleep_or_cancel(interval).await?;
        }
    }

    async fn lookup_cache(&self) -> Option<CachedAsset> {
        match self
            .ctx
            .cache
            .retrieve(&self.prompt.text, self.prompt.profile)
            .await
        {
            Ok(hit) => {
                metrics::record_cache_lookup(hit.is_some());
                hit
            }
            Err(e) => {
                metrics::record_cache_lookup(false);
                self.logger
                    .log_warning(&format!("Cache lookup failed, treating as miss: {}", e));
                None
            }
        }
    }

    async fn sleep_or_cancel(&mut self, duration: Duration) -> Result<(), StepError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
        }
    }

    async fn transition(&mut self, state: JobState) {
        self.state = state;
        let attempt = self.attempt;
        let provider = self.provider.clone();
        let task = self.task.as_ref().map(|t| t.task_id.clone());
        self.progress
            .emit(state, |event| {
                let event = event.with_attempt(attempt).with_provider(provider);
                match task {
                    Some(task_id) => event.with_detail(format!("task {}", task_id)),
                    None => event,
                }
            })
            .await;
    }

    /// Intermediate provider status, observability only.
    async fn publish_status(&self, status: &PendingStatus) {
        let attempt = self.attempt;
        let provider = self.provider.clone();
        let detail = status.message.clone();
        let percent = status.progress;
        self.progress
            .emit(self.state, |event| {
                let event = event
                    .with_attempt(attempt)
                    .with_provider(provider)
                    .with_percent(percent);
                match detail {
                    Some(detail) => event.with_detail(detail),
                    None => event,
                }
            })
            .await;
    }

    /// Publish the terminal event and build the result.
    async fn finish(&mut self, outcome: JobOutcome) -> JobResult {
        self.state = outcome.state();
        let elapsed = self.started.elapsed();
        let attempt = outcome.attempts();

        match &outcome {
            JobOutcome::Completed {
                cached, provider, ..
            } => {
                self.logger.log_completion(*cached, attempt);
                metrics::record_job(if *cached { "cached" } else { "completed" }, elapsed);
                let provider = provider.clone();
                let cached = *cached;
                self.progress
                    .emit(JobState::Completed, |event| {
                        let event = event.with_attempt(attempt).with_provider(provider);
                        if cached {
                            event.with_detail("cache hit")
                        } else {
                            event
                        }
                    })
                    .await;
            }
            JobOutcome::Failed { reason, kind, .. } => {
                self.logger.log_error(attempt, reason);
                metrics::record_job(kind.as_str(), elapsed);
                let provider = self.provider.clone();
                let reason = reason.clone();
                self.progress
                    .emit(JobState::Failed, |event| {
                        event
                            .with_attempt(attempt)
                            .with_provider(provider)
                            .with_detail(reason)
                    })
                    .await;
            }
        }

        JobResult {
            prompt_id: self.prompt.id.clone(),
            sequence: self.prompt.sequence,
            outcome,
        }
    }

    fn cache_hit(asset: CachedAsset) -> JobOutcome {
        JobOutcome::Completed {
            asset,
            cached: true,
            attempts: 0,
            provider: None,
        }
    }

    fn cancelled_outcome(&self) -> JobOutcome {
        JobOutcome::Failed {
            reason: "Batch cancelled".to_string(),
            kind: FailureKind::Cancelled,
            attempts: self.attempt,
        }
    }
}
