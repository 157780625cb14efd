//! Worker configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fixed concurrency budget. `None` uses the capacity probe.
    pub max_concurrent_jobs: Option<usize>,
    /// Upper bound applied to the probed budget
    pub max_capacity: usize,
    /// Attempts per provider before giving up on it
    pub max_attempts: u32,
    /// Backoff before the second attempt (doubles after each failure)
    pub backoff_base: Duration,
    /// Ceiling for a single backoff delay
    pub backoff_max: Duration,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Hard limit on polling one remote task
    pub poll_timeout: Duration,
    /// Local cache directory
    pub cache_dir: String,
    /// Asset record directory
    pub asset_dir: String,
    /// Memory assumed per concurrent job, for the capacity probe
    pub memory_per_job_mb: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: None,
            max_capacity: 16,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(300), // 5 minutes
            cache_dir: "/tmp/vgen/cache".to_string(),
            asset_dir: "/tmp/vgen/assets".to_string(),
            memory_per_job_mb: 512,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse::<usize>("VGEN_MAX_CONCURRENT_JOBS").filter(|n| *n > 0),
            max_capacity: env_parse("VGEN_MAX_CAPACITY").unwrap_or(defaults.max_capacity),
            max_attempts: env_parse("VGEN_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            backoff_base: env_parse("VGEN_BACKOFF_BASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_base),
            backoff_max: env_parse("VGEN_BACKOFF_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
            poll_interval: env_parse("VGEN_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            poll_timeout: env_parse("VGEN_POLL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_timeout),
            cache_dir: std::env::var("VGEN_CACHE_DIR").unwrap_or(defaults.cache_dir),
            asset_dir: std::env::var("VGEN_ASSET_DIR").unwrap_or(defaults.asset_dir),
            memory_per_job_mb: env_parse("VGEN_MEMORY_PER_JOB_MB")
                .unwrap_or(defaults.memory_per_job_mb),
        }
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = Some(jobs.max(1));
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_poll(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_base_delay(self.backoff_base)
            .with_max_delay(self.backoff_max)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
