//! Batch generation binary.
//!
//! Usage: `vgen-worker [prompts.json]` (reads stdin when no file is given).

use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_billing::InMemoryLedger;
use vgen_models::{JobOutcome, Prompt};
use vgen_provider::{HttpProvider, HttpProviderConfig};
use vgen_queue::RedisProgress;
use vgen_storage::{JsonFileRepository, LocalAssetCache};
use vgen_worker::{Orchestrator, Settlement, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    match run().await {
        Ok(true) => info!("Batch committed"),
        Ok(false) => {
            warn!("Batch rolled back");
            std::process::exit(2);
        }
        Err(e) => {
            error!("Batch failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vgen=info", "hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Returns whether the transaction committed.
async fn run() -> anyhow::Result<bool> {
    info!("Starting vgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let prompts = load_prompts(std::env::args().nth(1)).await?;
    if prompts.is_empty() {
        anyhow::bail!("no prompts to generate");
    }

    let balance = std::env::var("VGEN_CREDIT_BALANCE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0u64);

    let cache = LocalAssetCache::open(&config.cache_dir)
        .await
        .context("opening asset cache")?;
    let repository = JsonFileRepository::open(&config.asset_dir)
        .await
        .context("opening asset repository")?;

    let mut builder = Orchestrator::builder(config)
        .cache(Arc::new(cache))
        .repository(Arc::new(repository))
        .ledger(Arc::new(InMemoryLedger::new(balance)));

    if let Some(primary) = HttpProviderConfig::from_env("VGEN_PRIMARY", "primary") {
        builder = builder.primary(Arc::new(HttpProvider::new(primary)?));
    }
    if let Some(fallback) = HttpProviderConfig::from_env("VGEN_FALLBACK", "fallback") {
        builder = builder.fallback(Arc::new(HttpProvider::new(fallback)?));
    }
    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        builder = builder.progress_sink(Arc::new(RedisProgress::new(&redis_url)?));
    }

    let orchestrator = builder.build()?;
    let estimate = orchestrator.estimate_cost(&prompts);
    info!(
        prompts = prompts.len(),
        cost = estimate.total,
        balance,
        concurrency = orchestrator.concurrency(),
        "Submitting batch"
    );

    let report = orchestrator.run_batch(prompts, None).await?;

    for result in &report.results {
        match &result.outcome {
            JobOutcome::Completed {
                asset,
                cached,
                attempts,
                ..
            } => info!(
                prompt_id = %result.prompt_id,
                sequence = result.sequence,
                location = %asset.location,
                cached,
                attempts,
                "completed"
            ),
            JobOutcome::Failed {
                reason,
                kind,
                attempts,
            } => warn!(
                prompt_id = %result.prompt_id,
                sequence = result.sequence,
                kind = %kind,
                attempts,
                reason = %reason,
                "failed"
            ),
        }
    }

    match &report.settlement {
        Settlement::Committed(receipt) => {
            info!(
                transaction_id = %report.transaction_id,
                completed = report.completed(),
                failed = report.failed(),
                credits = receipt.credits_deducted,
                balance_after = receipt.balance_after,
                "Transaction committed"
            );
            Ok(true)
        }
        Settlement::RolledBack { reason } => {
            warn!(
                transaction_id = %report.transaction_id,
                reason = %reason,
                "Transaction rolled back"
            );
            Ok(false)
        }
    }
}

async fn load_prompts(path: Option<String>) -> anyhow::Result<Vec<Prompt>> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("reading prompts from stdin")?;
            raw
        }
    };

    let mut prompts: Vec<Prompt> = serde_json::from_str(&raw).context("parsing prompts")?;
    for (index, prompt) in prompts.iter_mut().enumerate() {
        prompt.sequence = index as u32;
    }
    Ok(prompts)
}
