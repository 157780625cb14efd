//! Shared doubles for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use vgen_billing::InMemoryLedger;
use vgen_models::{JobState, ProgressEvent, PromptId};
use vgen_provider::{
    GenerationRequest, PendingStatus, Provider, ProviderError, ProviderResult, TaskHandle,
    TaskStatus,
};
use vgen_queue::{ProgressSink, QueueResult};
use vgen_storage::{MemoryAssetCache, MemoryAssetRepository};
use vgen_worker::{Orchestrator, OrchestratorBuilder, WorkerConfig};

/// What one submission does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Submission fails with this error
    Fail(fn() -> ProviderError),
    /// Task reports pending for `polls` polls, then succeeds
    Succeed { polls: usize },
    /// Task stays pending forever
    Hang,
}

#[derive(Debug)]
struct Task {
    remaining_polls: Option<usize>,
}

/// Provider driven by a script of submission outcomes.
///
/// Once the script is exhausted every further submission succeeds
/// immediately. Optional `work` delay simulates generation time.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    tasks: Mutex<HashMap<String, Task>>,
    submit_times: Mutex<Vec<Instant>>,
    submissions: AtomicUsize,
    work: Duration,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(HashMap::new()),
            submit_times: Mutex::new(Vec::new()),
            submissions: AtomicUsize::new(0),
            work: Duration::ZERO,
        }
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    /// Each task takes this long to produce its content.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn submit_times(&self) -> Vec<Instant> {
        self.submit_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, _request: &GenerationRequest) -> ProviderResult<TaskHandle> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        self.submit_times.lock().unwrap().push(Instant::now());

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed { polls: 0 });

        let remaining_polls = match step {
            Step::Fail(make) => return Err(make()),
            Step::Succeed { polls } => Some(polls),
            Step::Hang => None,
        };

        let task_id = format!("{}-task-{}", self.name, n);
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), Task { remaining_polls });
        Ok(TaskHandle::new(task_id))
    }

    async fn poll(&self, handle: &TaskHandle) -> ProviderResult<TaskStatus> {
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&handle.task_id)
            .ok_or_else(|| ProviderError::invalid_response("unknown task"))?;

        match task.remaining_polls.as_mut() {
            None => Ok(TaskStatus::Pending(PendingStatus::queued())),
            Some(0) => Ok(TaskStatus::Succeeded {
                location: format!("https://cdn.example/{}.mp4", handle.task_id),
            }),
            Some(n) => {
                *n -= 1;
                Ok(TaskStatus::Pending(PendingStatus::running(Some(50))))
            }
        }
    }

    async fn download(&self, location: &str) -> ProviderResult<Vec<u8>> {
        Ok(format!("video bytes from {}", location).into_bytes())
    }
}

/// Tracks how many jobs are in an active state at once.
#[derive(Default)]
pub struct ActiveTracker {
    states: Mutex<HashMap<PromptId, JobState>>,
    peak: AtomicUsize,
    events: Mutex<Vec<ProgressEvent>>,
}

impl ActiveTracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events_for(&self, prompt_id: &PromptId) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.prompt_id == prompt_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProgressSink for ActiveTracker {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut states = self.states.lock().unwrap();
        states.insert(event.prompt_id.clone(), event.state);
        let active = states.values().filter(|s| s.is_active()).count();
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub cache: Arc<MemoryAssetCache>,
    pub ledger: Arc<InMemoryLedger>,
    pub repository: Arc<MemoryAssetRepository>,
    pub tracker: Arc<ActiveTracker>,
}

pub fn test_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig::default()
        .with_max_concurrent_jobs(concurrency)
        .with_poll(Duration::from_millis(100), Duration::from_secs(300))
}

pub fn builder(
    config: WorkerConfig,
    primary: Arc<ScriptedProvider>,
    balance: u64,
) -> (OrchestratorBuilder, Parts) {
    let cache = Arc::new(MemoryAssetCache::new());
    let ledger = Arc::new(InMemoryLedger::new(balance));
    let repository = Arc::new(MemoryAssetRepository::new());
    let tracker = Arc::new(ActiveTracker::default());

    let builder = Orchestrator::builder(config)
        .primary(primary)
        .cache(cache.clone())
        .ledger(ledger.clone())
        .repository(repository.clone())
        .progress_sink(tracker.clone());

    (
        builder,
        Parts {
            cache,
            ledger,
            repository,
            tracker,
        },
    )
}

/// Collaborators of a harness before the orchestrator is built.
pub struct Parts {
    pub cache: Arc<MemoryAssetCache>,
    pub ledger: Arc<InMemoryLedger>,
    pub repository: Arc<MemoryAssetRepository>,
    pub tracker: Arc<ActiveTracker>,
}

impl Parts {
    pub fn finish(self, orchestrator: Orchestrator) -> Harness {
        Harness {
            orchestrator,
            cache: self.cache,
            ledger: self.ledger,
            repository: self.repository,
            tracker: self.tracker,
        }
    }
}

pub fn harness(primary: Arc<ScriptedProvider>, concurrency: usize, balance: u64) -> Harness {
    let (builder, parts) = builder(test_config(concurrency), primary, balance);
    parts.finish(builder.build().unwrap())
}

pub fn network() -> ProviderError {
    ProviderError::network("connection reset")
}

pub fn unauthorized() -> ProviderError {
    ProviderError::unauthorized("invalid api key")
}

pub fn validation() -> ProviderError {
    ProviderError::validation("prompt rejected")
}

pub fn quota_exceeded() -> ProviderError {
    ProviderError::quota_exceeded("monthly quota used up")
}

pub fn overloaded() -> ProviderError {
    ProviderError::unavailable("fallback overloaded")
}
