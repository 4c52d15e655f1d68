//! Process-local Counter Store
//!
//! Map from counter key to `(count, bucket)`. A key's counter is reset
//! lazily when a request arrives with a different bucket. Per-key updates
//! happen under the map's shard lock, so concurrent requests in one process
//! never lose an increment.
//!
//! Every [`PRUNE_INTERVAL`] new keys the table drops counters whose window
//! has already ended, so one-shot keys do not accumulate.

use dashmap::DashMap;
use platform::rate_limit::{CounterStore, CounterStoreError, bucket_reset_secs};
use std::sync::atomic::{AtomicU64, Ordering};

/// New keys between two sweeps of expired counters
pub const PRUNE_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    bucket: u64,
    /// Unix seconds at which `bucket` rolls over
    expires_at: i64,
}

/// In-memory counter table
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, WindowCounter>,
    inserts: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `key` in `bucket` of a `window_secs` window and return the post-increment count
    pub fn increment_sync(&self, key: &str, bucket: u64, window_secs: u64) -> u64 {
        let expires_at = bucket_reset_secs(bucket, window_secs);

        if let Some(mut counter) = self.counters.get_mut(key) {
            return bump(&mut counter, bucket, expires_at);
        }

        let count = {
            let mut counter = self.counters.entry(key.to_string()).or_insert(WindowCounter {
                count: 0,
                bucket,
                expires_at,
            });
            bump(&mut counter, bucket, expires_at)
        };

        // Sweep outside the entry guard; retain locks every shard.
        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_INTERVAL == 0 {
            let window_start = expires_at.saturating_sub(window_secs.try_into().unwrap_or(i64::MAX));
            self.prune_expired(window_start);
        }

        count
    }

    /// Drop counters whose window ended at or before `now_secs`; returns how many were removed
    pub fn prune_expired(&self, now_secs: i64) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now_secs);
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.counters.len(), "Pruned expired local counters");
        }
        removed
    }

    /// Current count for `key`, if tracked
    pub fn count(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|c| c.count)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

fn bump(counter: &mut WindowCounter, bucket: u64, expires_at: i64) -> u64 {
    if counter.bucket != bucket {
        *counter = WindowCounter {
            count: 0,
            bucket,
            expires_at,
        };
    }
    counter.count = counter.count.saturating_add(1);
    counter.count
}

impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        window_secs: u64,
    ) -> Result<u64, CounterStoreError> {
        Ok(self.increment_sync(key, bucket, window_secs))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
