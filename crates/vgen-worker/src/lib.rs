//! Generation orchestration worker.
//!
//! This crate provides:
//! - The per-prompt generation state machine with retry and fallback
//! - A concurrency-bounded batch scheduler with cancellation
//! - Single-flight generation per cache key
//! - The orchestrator facade tying batches to credit transactions
//! - Configuration, capacity probing, structured logging and metrics

pub mod cancel;
pub mod capacity;
pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod single_flight;

pub use cancel::{CancelHandle, CancelSignal};
pub use capacity::{CapacityProbe, FixedCapacity, SystemCapacity};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use generation::{GenerationJob, JobContext, JobSlot, ProviderChain};
pub use logging::JobLogger;
pub use orchestrator::{BatchReport, Orchestrator, OrchestratorBuilder, Settlement};
pub use retry::RetryPolicy;
pub use scheduler::{BatchHandle, BatchScheduler};
pub use single_flight::SingleFlight;
