//! End-to-end orchestrator behavior against scripted providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use vgen_billing::{BillingError, CreditLedger, InMemoryLedger};
use vgen_models::{CacheKey, FailureKind, JobOutcome, JobState, Prompt, QualityProfile};
use vgen_provider::{GenerationRequest, Provider, ProviderResult, TaskHandle, TaskStatus};
use vgen_storage::{AssetCache, MemoryAssetCache, MemoryAssetRepository};
use vgen_worker::{Orchestrator, Settlement, WorkerError};

use common::*;

fn completed(outcome: &JobOutcome) -> (bool, u32, Option<String>) {
    match outcome {
        JobOutcome::Completed {
            cached,
            attempts,
            provider,
            ..
        } => (*cached, *attempts, provider.clone()),
        other => panic!("expected completed, got {other:?}"),
    }
}

fn failed(outcome: &JobOutcome) -> (FailureKind, u32, String) {
    match outcome {
        JobOutcome::Failed {
            kind,
            attempts,
            reason,
        } => (*kind, *attempts, reason.clone()),
        other => panic!("expected failed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sunset_prompt_recovers_after_two_network_failures() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_steps([
        Step::Fail(network),
        Step::Fail(network),
        Step::Succeed { polls: 2 },
    ]));
    let h = harness(provider.clone(), 2, 100);

    let prompt = Prompt::new("sunset over mountains")
        .with_profile(QualityProfile::Standard)
        .with_duration(5);
    let prompt_id = prompt.id.clone();

    let report = h.orchestrator.run_batch(vec![prompt], None).await.unwrap();

    assert_eq!(report.results.len(), 1);
    let (cached, attempts, provider_name) = completed(&report.results[0].outcome);
    assert!(!cached);
    assert_eq!(attempts, 3);
    assert_eq!(provider_name.as_deref(), Some("primary"));
    assert_eq!(provider.submissions(), 3);

    // Stored under key(text, standard)
    let key = CacheKey::derive("sunset over mountains", QualityProfile::Standard);
    let hit = h
        .cache
        .retrieve("sunset over mountains", QualityProfile::Standard)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.key, key);

    // Default table: standard is 2 credits/s
    assert!(report.is_committed());
    assert_eq!(h.ledger.balance().await.unwrap(), 90);
    assert_eq!(h.repository.len(), 1);

    let events = h.tracker.events_for(&prompt_id);
    assert_eq!(events.first().map(|e| e.state), Some(JobState::CheckingCache));
    assert_eq!(events.last().map(|e| e.state), Some(JobState::Completed));
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    for state in [JobState::Waiting, JobState::Processing, JobState::Downloading] {
        assert!(events.iter().any(|e| e.state == state), "missing {state}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_attempts() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_steps([
        Step::Fail(network),
        Step::Fail(network),
        Step::Fail(network),
    ]));
    let h = harness(provider.clone(), 1, 100);

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("tidal waves")])
        .collect_all()
        .await;

    let (kind, attempts, reason) = failed(&results[0].outcome);
    assert_eq!(kind, FailureKind::MaxRetriesExceeded);
    assert_eq!(attempts, 3);
    assert!(reason.contains("Network"), "{reason}");

    let times = provider.submit_times();
    assert_eq!(times.len(), 3);
    let tolerance = Duration::from_millis(50);
    let first = times[1] - times[0];
    let second = times[2] - times[1];
    assert!(first >= Duration::from_secs(1) && first < Duration::from_secs(1) + tolerance);
    assert!(second >= Duration::from_secs(2) && second < Duration::from_secs(2) + tolerance);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_fails_without_retry() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_steps([Step::Fail(unauthorized)]));
    let h = harness(provider.clone(), 1, 100);

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("city lights")])
        .collect_all()
        .await;

    let (kind, attempts, _) = failed(&results[0].outcome);
    assert_eq!(kind, FailureKind::Unauthorized);
    assert_eq!(attempts, 1);
    assert_eq!(provider.submissions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_after_primary_exhausts_retries() {
    let primary = Arc::new(ScriptedProvider::new("primary").with_steps([
        Step::Fail(network),
        Step::Fail(network),
        Step::Fail(network),
    ]));
    let fallback = Arc::new(ScriptedProvider::new("fallback"));
    let (builder, parts) = builder(test_config(1), primary.clone(), 100);
    let h = parts.finish(builder.fallback(fallback.clone()).build().unwrap());

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("forest at dawn")])
        .collect_all()
        .await;

    let (cached, attempts, provider_name) = completed(&results[0].outcome);
    assert!(!cached);
    assert_eq!(attempts, 1);
    assert_eq!(provider_name.as_deref(), Some("fallback"));
    assert_eq!(primary.submissions(), 3);
    assert_eq!(fallback.submissions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_exhaustion_reports_last_error() {
    let primary = Arc::new(ScriptedProvider::new("primary").with_steps([
        Step::Fail(network),
        Step::Fail(network),
        Step::Fail(network),
    ]));
    let fallback = Arc::new(ScriptedProvider::new("fallback").with_steps([
        Step::Fail(overloaded),
        Step::Fail(overloaded),
        Step::Fail(overloaded),
    ]));
    let (builder, parts) = builder(test_config(1), primary.clone(), 100);
    let h = parts.finish(builder.fallback(fallback.clone()).build().unwrap());

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("northern lights")])
        .collect_all()
        .await;

    let (kind, attempts, reason) = failed(&results[0].outcome);
    assert_eq!(kind, FailureKind::MaxRetriesExceeded);
    assert_eq!(attempts, 3);
    assert!(reason.contains("fallback overloaded"), "{reason}");
    assert_eq!(primary.submissions(), 3);
    assert_eq!(fallback.submissions(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_auth_and_quota_errors_fall_back_once() {
    let primary = Arc::new(
        ScriptedProvider::new("primary")
            .with_steps([Step::Fail(unauthorized), Step::Fail(quota_exceeded)]),
    );
    let fallback = Arc::new(ScriptedProvider::new("fallback"));
    let (builder, parts) = builder(test_config(1), primary.clone(), 100);
    let h = parts.finish(builder.fallback(fallback.clone()).build().unwrap());

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("desert storm"), Prompt::new("snowy pines")])
        .collect_all()
        .await;

    assert_eq!(results.len(), 2);
    for result in &results {
        let (_, attempts, provider_name) = completed(&result.outcome);
        assert_eq!(attempts, 1);
        assert_eq!(provider_name.as_deref(), Some("fallback"));
    }
    assert_eq!(primary.submissions(), 2);
    assert_eq!(fallback.submissions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_never_falls_back() {
    let primary = Arc::new(ScriptedProvider::new("primary").with_steps([Step::Fail(validation)]));
    let fallback = Arc::new(ScriptedProvider::new("fallback"));
    let (builder, parts) = builder(test_config(1), primary.clone(), 100);
    let h = parts.finish(builder.fallback(fallback.clone()).build().unwrap());

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("???")])
        .collect_all()
        .await;

    let (kind, attempts, _) = failed(&results[0].outcome);
    assert_eq!(kind, FailureKind::Validation);
    assert_eq!(attempts, 1);
    assert_eq!(fallback.submissions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_batch_is_served_from_cache() {
    let provider = Arc::new(ScriptedProvider::new("primary"));
    let h = harness(provider.clone(), 2, 100);

    let first = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("a red balloon")])
        .collect_all()
        .await;
    assert!(!completed(&first[0].outcome).0);
    assert_eq!(provider.submissions(), 1);

    let second = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("a red balloon")])
        .collect_all()
        .await;
    let (cached, attempts, provider_name) = completed(&second[0].outcome);
    assert!(cached);
    assert_eq!(attempts, 0);
    assert!(provider_name.is_none());
    assert_eq!(provider.submissions(), 1);

    // Different profile is a different key
    let third = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("a red balloon").with_profile(QualityProfile::Premium)])
        .collect_all()
        .await;
    assert!(!completed(&third[0].outcome).0);
    assert_eq!(provider.submissions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_budget_is_never_exceeded() {
    let provider = Arc::new(
        ScriptedProvider::new("primary")
            .with_work(Duration::from_millis(500))
            .with_steps((0..10).map(|_| Step::Succeed { polls: 2 })),
    );
    let h = harness(provider.clone(), 3, 1_000);

    let prompts: Vec<Prompt> = (0..10)
        .map(|i| Prompt::new(format!("scene {i}")).with_sequence(i))
        .collect();
    let ids: Vec<_> = prompts.iter().map(|p| p.id.clone()).collect();

    let mut handle = h.orchestrator.schedule_unbilled(prompts);
    assert_eq!(handle.total(), 10);

    let mut seen = Vec::new();
    while let Some(result) = handle.next().await {
        assert!(result.outcome.is_completed());
        seen.push(result.prompt_id);
    }

    assert_eq!(seen.len(), 10);
    for id in &ids {
        assert!(seen.contains(id));
    }
    assert_eq!(h.tracker.peak(), 3);
    assert_eq!(h.orchestrator.status_board().terminal_count(), 10);
    assert_eq!(h.orchestrator.status_board().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_begin_rejects_insufficient_credits() {
    let provider = Arc::new(ScriptedProvider::new("primary"));
    let h = harness(provider, 1, 30);

    let err = h.orchestrator.begin_transaction(50).await.unwrap_err();
    assert!(err.is_insufficient_credits());
    assert_eq!(h.ledger.balance().await.unwrap(), 30);
    assert_eq!(h.ledger.available().await.unwrap(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_commit_deducts_reservation_and_persists_assets() {
    let provider = Arc::new(ScriptedProvider::new("primary"));
    let h = harness(provider, 2, 200);

    let tx = h.orchestrator.begin_transaction(50).await.unwrap();
    assert_eq!(h.ledger.available().await.unwrap(), 150);

    let results = h
        .orchestrator
        .schedule_batch(vec![Prompt::new("one"), Prompt::new("two")], &tx)
        .collect_all()
        .await;
    assert!(results.iter().all(|r| r.outcome.is_completed()));
    assert_eq!(tx.pending_count().await, 2);

    let receipt = h.orchestrator.commit(&tx).await.unwrap();
    assert_eq!(receipt.credits_deducted, 50);
    assert_eq!(h.ledger.balance().await.unwrap(), 150);
    assert_eq!(h.repository.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_commit_is_refused_while_jobs_are_running() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_work(Duration::from_secs(5)));
    let h = harness(provider, 1, 200);

    let tx = h.orchestrator.begin_transaction(50).await.unwrap();
    let handle = h
        .orchestrator
        .schedule_batch(vec![Prompt::new("slow glacier")], &tx);

    let err = h.orchestrator.commit(&tx).await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Billing(BillingError::JobsInFlight { in_flight: 1 })
    ));
    assert_eq!(h.ledger.balance().await.unwrap(), 200);

    let results = handle.collect_all().await;
    assert!(results[0].outcome.is_completed());

    let receipt = h.orchestrator.commit(&tx).await.unwrap();
    assert_eq!(receipt.assets.len(), 1);
    assert_eq!(h.repository.len(), 1);
    assert_eq!(h.ledger.balance().await.unwrap(), 150);
}

#[tokio::test(start_paused = true)]
async fn test_results_after_rollback_are_not_delivered() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_work(Duration::from_secs(5)));
    let h = harness(provider, 1, 200);

    let tx = h.orchestrator.begin_transaction(50).await.unwrap();
    let handle = h
        .orchestrator
        .schedule_batch(vec![Prompt::new("late arrival")], &tx);
    h.orchestrator.rollback(&tx).await.unwrap();

    let results = handle.collect_all().await;
    let (kind, _, reason) = failed(&results[0].outcome);
    assert_eq!(kind, FailureKind::Internal);
    assert!(reason.contains("not staged"), "{reason}");
    assert!(h.repository.is_empty());
    assert_eq!(h.ledger.balance().await.unwrap(), 200);
    assert_eq!(tx.jobs_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_stream_yields_every_prompt() {
    let provider = Arc::new(ScriptedProvider::new("primary"));
    let h = harness(provider, 2, 100);

    let prompts = vec![Prompt::new("red"), Prompt::new("green"), Prompt::new("blue")];
    let mut expected: Vec<_> = prompts.iter().map(|p| p.id.clone()).collect();

    let results: Vec<_> = h
        .orchestrator
        .schedule_unbilled(prompts)
        .into_stream()
        .collect()
        .await;

    let mut seen: Vec<_> = results.iter().map(|r| r.prompt_id.clone()).collect();
    expected.sort();
    seen.sort();
    assert_eq!(seen, expected);
    assert!(results.iter().all(|r| r.outcome.is_completed()));
}

#[tokio::test(start_paused = true)]
async fn test_rollback_releases_reservation_and_persists_nothing() {
    let provider = Arc::new(ScriptedProvider::new("primary"));
    let h = harness(provider, 2, 200);

    let tx = h.orchestrator.begin_transaction(50).await.unwrap();
    h.orchestrator
        .schedule_batch(vec![Prompt::new("one"), Prompt::new("two")], &tx)
        .collect_all()
        .await;

    h.orchestrator.rollback(&tx).await.unwrap();
    assert_eq!(h.ledger.balance().await.unwrap(), 200);
    assert_eq!(h.ledger.available().await.unwrap(), 200);
    assert!(h.repository.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_batch_rolls_back_when_nothing_completes() {
    let provider = Arc::new(
        ScriptedProvider::new("primary")
            .with_steps([Step::Fail(unauthorized), Step::Fail(unauthorized)]),
    );
    let h = harness(provider, 2, 100);

    let report = h
        .orchestrator
        .run_batch(vec![Prompt::new("a"), Prompt::new("b")], Some(40))
        .await
        .unwrap();

    assert_eq!(report.failed(), 2);
    assert!(matches!(report.settlement, Settlement::RolledBack { .. }));
    assert_eq!(h.ledger.available().await.unwrap(), 100);
    assert!(h.repository.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_identical_prompts_generate_once() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_work(Duration::from_secs(1)));
    let h = harness(provider.clone(), 2, 100);

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("twin peaks"), Prompt::new("twin peaks")])
        .collect_all()
        .await;

    assert_eq!(results.len(), 2);
    let cached: Vec<bool> = results.iter().map(|r| completed(&r.outcome).0).collect();
    assert_eq!(cached.iter().filter(|c| **c).count(), 1);
    assert_eq!(provider.submissions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_timeout_is_retryable() {
    let provider = Arc::new(ScriptedProvider::new("primary").with_steps([Step::Hang, Step::Hang]));
    let config = test_config(1)
        .with_max_attempts(2)
        .with_poll(Duration::from_millis(100), Duration::from_secs(2));
    let (builder, parts) = builder(config, provider.clone(), 100);
    let h = parts.finish(builder.build().unwrap());

    let results = h
        .orchestrator
        .schedule_unbilled(vec![Prompt::new("slow motion")])
        .collect_all()
        .await;

    let (kind, attempts, reason) = failed(&results[0].outcome);
    assert_eq!(kind, FailureKind::MaxRetriesExceeded);
    assert_eq!(attempts, 2);
    assert!(reason.contains("Timeout"), "{reason}");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_yields_a_result_for_every_prompt() {
    let provider = Arc::new(
        ScriptedProvider::new("primary").with_steps([Step::Hang, Step::Hang, Step::Hang]),
    );
    let h = harness(provider, 1, 100);

    let prompts = vec![Prompt::new("x"), Prompt::new("y"), Prompt::new("z")];
    let mut handle = h.orchestrator.schedule_unbilled(prompts);

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();

    let mut kinds = Vec::new();
    while let Some(result) = handle.next().await {
        kinds.push(failed(&result.outcome).0);
    }
    assert_eq!(kinds, vec![FailureKind::Cancelled; 3]);
}

struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<TaskHandle> {
        if request.prompt == "explode" {
            panic!("provider bug");
        }
        Ok(TaskHandle::new(request.prompt.clone()))
    }

    async fn poll(&self, handle: &TaskHandle) -> ProviderResult<TaskStatus> {
        Ok(TaskStatus::Succeeded {
            location: format!("https://cdn.example/{}", handle.task_id),
        })
    }

    async fn download(&self, _location: &str) -> ProviderResult<Vec<u8>> {
        Ok(b"ok".to_vec())
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_job_does_not_abort_siblings() {
    let orchestrator = Orchestrator::builder(test_config(2))
        .primary(Arc::new(PanickingProvider))
        .cache(Arc::new(MemoryAssetCache::new()))
        .ledger(Arc::new(InMemoryLedger::new(100)))
        .repository(Arc::new(MemoryAssetRepository::new()))
        .build()
        .unwrap();

    let results = orchestrator
        .schedule_unbilled(vec![Prompt::new("explode"), Prompt::new("calm sea")])
        .collect_all()
        .await;

    assert_eq!(results.len(), 2);
    let internal = results
        .iter()
        .filter(|r| matches!(r.outcome, JobOutcome::Failed { kind: FailureKind::Internal, .. }))
        .count();
    assert_eq!(internal, 1);
    assert_eq!(results.iter().filter(|r| r.outcome.is_completed()).count(), 1);
}

#[tokio::test]
async fn test_build_without_provider_fails_fast() {
    let result = Orchestrator::builder(test_config(1))
        .cache(Arc::new(MemoryAssetCache::new()))
        .ledger(Arc::new(InMemoryLedger::new(0)))
        .repository(Arc::new(MemoryAssetRepository::new()))
        .build();

    assert!(matches!(result, Err(WorkerError::NoProviderAvailable)));
}
