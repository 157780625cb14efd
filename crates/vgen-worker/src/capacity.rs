//! Concurrency budget from host resources.

use sysinfo::System;
use tracing::debug;

/// Source of the recommended concurrency budget.
pub trait CapacityProbe: Send + Sync {
    fn recommended_concurrency(&self) -> usize;
}

/// Fixed budget, for configuration overrides and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapacity(pub usize);

impl CapacityProbe for FixedCapacity {
    fn recommended_concurrency(&self) -> usize {
        self.0.max(1)
    }
}

/// Budget derived from CPU count and available memory.
#[derive(Debug, Clone)]
pub struct SystemCapacity {
    memory_per_job_bytes: u64,
    max_capacity: usize,
}

impl SystemCapacity {
    pub fn new(memory_per_job_mb: u64, max_capacity: usize) -> Self {
        Self {
            memory_per_job_bytes: memory_per_job_mb.max(1).saturating_mul(1024 * 1024),
            max_capacity: max_capacity.max(1),
        }
    }
}

impl CapacityProbe for SystemCapacity {
    fn recommended_concurrency(&self) -> usize {
        let cpus = num_cpus::get();
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();

        let budget = compute_budget(cpus, available, self.memory_per_job_bytes, self.max_capacity);
        debug!(
            cpus,
            available_mb = available / (1024 * 1024),
            budget,
            "Probed concurrency budget"
        );
        budget
    }
}

/// `min(cpus, available / per_job)` clamped to `[1, max_capacity]`.
pub fn compute_budget(cpus: usize, available_bytes: u64, per_job_bytes: u64, max_capacity: usize) -> usize {
    let by_memory = available_bytes / per_job_bytes.max(1);
    let by_memory = usize::try_from(by_memory).unwrap_or(usize::MAX);
    cpus.min(by_memory).clamp(1, max_capacity.max(1))
}
