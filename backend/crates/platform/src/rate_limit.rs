//! Rate Limiting Infrastructure
//!
//! Fixed-window counter vocabulary shared by every counter store:
//! the window policy, bucket arithmetic, the per-request decision
//! and the `CounterStore` seam.
//!
//! A window of `window_secs` seconds is identified by
//! `bucket = floor(now / window_secs)` and rolls over at
//! `(bucket + 1) * window_secs`.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Smallest accepted window; shorter windows are clamped to it
pub const MIN_WINDOW_SECS: u64 = 1;

/// Rate limit policy for one call site: `limit` requests per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    limit: u32,
    window_secs: u64,
}

impl RateLimitWindow {
    /// `limit = 0` rejects every request; `window_secs` is clamped to [`MIN_WINDOW_SECS`]
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window_secs: window_secs.max(MIN_WINDOW_SECS),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Bucket that contains `now`
    pub fn bucket_at(&self, now: DateTime<Utc>) -> u64 {
        window_bucket(now.timestamp(), self.window_secs)
    }

    /// Instant at which `bucket` rolls over
    pub fn reset_at(&self, bucket: u64) -> DateTime<Utc> {
        let secs = bucket_reset_secs(bucket, self.window_secs);
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// `floor(now_secs / window_secs)`; instants before the epoch fall in bucket 0
pub fn window_bucket(now_secs: i64, window_secs: u64) -> u64 {
    let now = u64::try_from(now_secs).unwrap_or(0);
    now / window_secs.max(MIN_WINDOW_SECS)
}

/// `(bucket + 1) * window_secs`, saturating
pub fn bucket_reset_secs(bucket: u64, window_secs: u64) -> i64 {
    let secs = bucket
        .saturating_add(1)
        .saturating_mul(window_secs.max(MIN_WINDOW_SECS));
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Outcome of one rate limit check
///
/// `retry_after` is `Some` exactly when `is_rate_limited` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub is_rate_limited: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// Decide from the post-increment count `count` observed in `bucket`
    pub fn evaluate(count: u64, window: &RateLimitWindow, bucket: u64, now: DateTime<Utc>) -> Self {
        let limit = window.limit();
        let is_rate_limited = count > u64::from(limit);
        let remaining = u64::from(limit).saturating_sub(count) as u32;
        let reset_at = window.reset_at(bucket);

        let retry_after = is_rate_limited.then(|| {
            let secs = reset_at.timestamp().saturating_sub(now.timestamp());
            u64::try_from(secs).unwrap_or(0)
        });

        Self {
            is_rate_limited,
            limit,
            remaining,
            reset_at,
            retry_after,
        }
    }

    /// Allowed without counting (fail-open while the store is unavailable)
    pub fn unmetered(window: &RateLimitWindow, bucket: u64) -> Self {
        Self {
            is_rate_limited: false,
            limit: window.limit(),
            remaining: window.limit(),
            reset_at: window.reset_at(bucket),
            retry_after: None,
        }
    }

    /// `reset_at` as Unix seconds
    pub fn reset_at_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Error raised by a counter store call
#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store ({backend}) failed: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("counter store ({backend}) timed out after {timeout:?}")]
    Timeout {
        backend: &'static str,
        timeout: Duration,
    },

    #[error("counter store ({backend}) returned an invalid count: {detail}")]
    InvalidResponse {
        backend: &'static str,
        detail: String,
    },

    #[error("counter store ({backend}) is suspended after a recent failure")]
    Suspended { backend: &'static str },
}

impl CounterStoreError {
    pub fn backend<E>(backend: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            backend,
            source: Box::new(source),
        }
    }
}

/// Trait for rate limit counter backends
///
/// Implementations must perform the increment and the first-hit expiry
/// as one indivisible operation at the store.
#[trait_variant::make(CounterStore: Send)]
pub trait LocalCounterStore {
    /// Increment the counter for `key` in `bucket` and return the post-increment count.
    /// The first increment in a bucket makes the entry expire after `window_secs`.
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        window_secs: u64,
    ) -> Result<u64, CounterStoreError>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
