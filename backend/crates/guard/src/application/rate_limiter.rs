//! Rate Limiter
//!
//! Fixed-window limiter over a shared [`CounterStore`], with a process-local
//! fallback. The critical section is the store's atomic increment; this type
//! never reads a count and writes it back.
//!
//! Fallback counting is per process. With N instances behind a balancer the
//! effective limit in fallback mode is up to N times the configured one.

use crate::application::config::{GuardConfig, StoreFailurePolicy};
use crate::error::{GuardError, GuardResult};
use crate::infra::memory::MemoryCounterStore;
use chrono::{DateTime, Utc};
use platform::rate_limit::{CounterStore, CounterStoreError, RateLimitResult, RateLimitWindow};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Limiter settings taken from [`GuardConfig`]
#[derive(Debug, Clone)]
pub struct RateLimiterSettings {
    pub store_timeout: Duration,
    pub store_retry_after: Duration,
    pub failure_policy: StoreFailurePolicy,
    pub key_prefix: String,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self::from(&GuardConfig::default())
    }
}

impl From<&GuardConfig> for RateLimiterSettings {
    fn from(config: &GuardConfig) -> Self {
        Self {
            store_timeout: config.store_timeout,
            store_retry_after: config.store_retry_after,
            failure_policy: config.failure_policy,
            key_prefix: config.key_prefix.clone(),
        }
    }
}

/// Fixed-window rate limiter
pub struct RateLimiter<S> {
    store: Option<Arc<S>>,
    fallback: Arc<MemoryCounterStore>,
    settings: RateLimiterSettings,
    /// Store is skipped until this instant (Unix ms); 0 when healthy
    suspended_until_ms: AtomicI64,
}

impl<S> RateLimiter<S> {
    /// Limiter without a shared store: every check is process-local
    pub fn in_process(settings: RateLimiterSettings) -> Self {
        Self {
            store: None,
            fallback: Arc::new(MemoryCounterStore::new()),
            settings,
            suspended_until_ms: AtomicI64::new(0),
        }
    }

    /// Replace the process-local counter table
    pub fn with_fallback(mut self, fallback: Arc<MemoryCounterStore>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn settings(&self) -> &RateLimiterSettings {
        &self.settings
    }

    pub fn has_shared_store(&self) -> bool {
        self.store.is_some()
    }

    /// Synchronous check against the process-local counters only
    pub fn check_rate_limit_sync(&self, key: &str, window: RateLimitWindow) -> RateLimitResult {
        self.check_rate_limit_sync_at(key, window, Utc::now())
    }

    pub fn check_rate_limit_sync_at(
        &self,
        key: &str,
        window: RateLimitWindow,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let bucket = window.bucket_at(now);
        let count = self
            .fallback
            .increment_sync(&self.store_key(key), bucket, window.window_secs());
        let result = RateLimitResult::evaluate(count, &window, bucket, now);
        log_decision(key, count, &result, self.fallback_backend());
        result
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    fn fallback_backend(&self) -> &'static str {
        "memory"
    }
}

impl<S> RateLimiter<S>
where
    S: CounterStore + Sync,
{
    pub fn new(store: S, settings: RateLimiterSettings) -> Self {
        Self::from_shared(Arc::new(store), settings)
    }

    /// Limiter over a store the caller keeps a handle to
    pub fn from_shared(store: Arc<S>, settings: RateLimiterSettings) -> Self {
        Self {
            store: Some(store),
            ..Self::in_process(settings)
        }
    }

    /// Check `key` against `window`, counting this request
    pub async fn check_rate_limit(
        &self,
        key: &str,
        window: RateLimitWindow,
    ) -> GuardResult<RateLimitResult> {
        self.check_rate_limit_at(key, window, Utc::now()).await
    }

    /// Like [`Self::check_rate_limit`] but rejects with [`GuardError::RateLimited`]
    pub async fn enforce(&self, key: &str, window: RateLimitWindow) -> GuardResult<RateLimitResult> {
        let result = self.check_rate_limit(key, window).await?;
        if result.is_rate_limited {
            return Err(GuardError::RateLimited(result));
        }
        Ok(result)
    }

    pub async fn check_rate_limit_at(
        &self,
        key: &str,
        window: RateLimitWindow,
        now: DateTime<Utc>,
    ) -> GuardResult<RateLimitResult> {
        let Some(store) = self.store.as_ref() else {
            return Ok(self.check_rate_limit_sync_at(key, window, now));
        };

        if self.is_suspended(now) {
            let err = CounterStoreError::Suspended {
                backend: store.backend(),
            };
            return self.degrade(err, key, window, now);
        }

        let bucket = window.bucket_at(now);
        let store_key = self.store_key(key);
        let timeout = self.settings.store_timeout;

        let outcome = tokio::time::timeout(
            timeout,
            store.increment(&store_key, bucket, window.window_secs()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CounterStoreError::Timeout {
                backend: store.backend(),
                timeout,
            })
        });

        match outcome {
            Ok(count) => {
                self.mark_healthy(store.backend());
                let result = RateLimitResult::evaluate(count, &window, bucket, now);
                log_decision(key, count, &result, store.backend());
                Ok(result)
            }
            Err(err) => {
                self.suspend(&err, now);
                self.degrade(err, key, window, now)
            }
        }
    }

    fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.suspended_until_ms.load(Ordering::Acquire)
    }

    fn mark_healthy(&self, backend: &'static str) {
        if self.suspended_until_ms.swap(0, Ordering::AcqRel) != 0 {
            tracing::info!(backend, "Counter store recovered");
        }
    }

    /// Skip the store for `store_retry_after`
    fn suspend(&self, err: &CounterStoreError, now: DateTime<Utc>) {
        let retry_ms =
            i64::try_from(self.settings.store_retry_after.as_millis()).unwrap_or(i64::MAX);
        self.suspended_until_ms.store(
            now.timestamp_millis().saturating_add(retry_ms).max(1),
            Ordering::Release,
        );

        let policy = self.settings.failure_policy;
        tracing::error!(
            error = %err,
            policy = policy.as_str(),
            retry_after_ms = retry_ms,
            "Counter store unavailable"
        );
        if policy == StoreFailurePolicy::Fallback {
            tracing::warn!("Rate limiting degraded to process-local counters");
        }
    }

    /// Decide without the shared store, per the failure policy
    fn degrade(
        &self,
        err: CounterStoreError,
        key: &str,
        window: RateLimitWindow,
        now: DateTime<Utc>,
    ) -> GuardResult<RateLimitResult> {
        match self.settings.failure_policy {
            StoreFailurePolicy::Fallback => Ok(self.check_rate_limit_sync_at(key, window, now)),
            StoreFailurePolicy::FailOpen => {
                tracing::debug!(key = key, "Rate limit check skipped (fail-open)");
                Ok(RateLimitResult::unmetered(&window, window.bucket_at(now)))
            }
            StoreFailurePolicy::FailClosed => Err(GuardError::StoreUnavailable(err)),
        }
    }
}

fn log_decision(key: &str, count: u64, result: &RateLimitResult, backend: &'static str) {
    if result.is_rate_limited {
        tracing::warn!(
            key = key,
            count = count,
            limit = result.limit,
            backend,
            "Rate limit exceeded"
        );
    } else {
        tracing::trace!(
            key = key,
            count = count,
            remaining = result.remaining,
            backend,
            "Rate limit check passed"
        );
    }
}
