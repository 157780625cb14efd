//! Per-cache-key in-flight lock.
//!
//! Two jobs that miss the cache on the same key would otherwise both pay for
//! generation. The second job waits here, then re-checks the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use vgen_models::CacheKey;

/// Held while a job generates content for a key.
#[derive(Debug)]
pub struct FlightGuard {
    _guard: OwnedMutexGuard<()>,
    /// True when another job held the key first.
    pub waited: bool,
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    locks: Mutex<HashMap<CacheKey, Weak<AsyncMutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`.
    pub async fn acquire(&self, key: &CacheKey) -> FlightGuard {
        let lock = self.lock_for(key);
        match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => FlightGuard {
                _guard: guard,
                waited: false,
            },
            Err(_) => FlightGuard {
                _guard: lock.lock_owned().await,
                waited: true,
            },
        }
    }

    /// Keys with a live lock.
    pub fn in_flight(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    fn lock_for(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        let Ok(mut locks) = self.locks.lock() else {
            // Poisoned map: fall back to an unshared lock
            return Arc::new(AsyncMutex::new(()));
        };
        locks.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vgen_models::QualityProfile;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let flights = Arc::new(SingleFlight::new());
        let key = CacheKey::derive("a", QualityProfile::Standard);

        let first = flights.acquire(&key).await;
        assert!(!first.waited);

        let flights2 = Arc::clone(&flights);
        let key2 = key.clone();
        let waiter = tokio::spawn(async move { flights2.acquire(&key2).await.waited });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let flights = SingleFlight::new();
        let a = flights.acquire(&CacheKey::derive("a", QualityProfile::Standard)).await;
        let b = flights.acquire(&CacheKey::derive("a", QualityProfile::Premium)).await;
        assert!(!a.waited && !b.waited);
        assert_eq!(flights.in_flight(), 2);

        drop(a);
        drop(b);
        assert_eq!(flights.in_flight(), 0);
    }
}
