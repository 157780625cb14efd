//! Orchestrator metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names.
pub mod names {
    pub const JOBS_TOTAL: &str = "vgen_jobs_total";
    pub const CACHE_LOOKUPS_TOTAL: &str = "vgen_cache_lookups_total";
    pub const PROVIDER_RETRIES_TOTAL: &str = "vgen_provider_retries_total";
    pub const PROVIDER_FALLBACKS_TOTAL: &str = "vgen_provider_fallbacks_total";
    pub const JOB_DURATION_SECONDS: &str = "vgen_job_duration_seconds";
}

/// Record a terminal job outcome (`completed`, `cached`, or a failure kind).
pub fn record_job(outcome: &'static str, duration: Duration) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(duration.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(names::CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

pub fn record_retry(provider: &str) {
    counter!(names::PROVIDER_RETRIES_TOTAL, "provider" => provider.to_string()).increment(1);
}

pub fn record_fallback() {
    counter!(names::PROVIDER_FALLBACKS_TOTAL).increment(1);
}
