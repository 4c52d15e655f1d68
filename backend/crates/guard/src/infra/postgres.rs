//! PostgreSQL Counter Store
//!
//! One `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` per check. The row
//! lock taken by the upsert serialises concurrent increments on the same
//! `(limit_key, bucket)`. Expired rows are removed by [`PgCounterStore::cleanup_expired`].

use chrono::Utc;
use platform::rate_limit::{CounterStore, CounterStoreError};
use sqlx::PgPool;

const BACKEND: &str = "postgres";

/// PostgreSQL-backed counter store
#[derive(Clone)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete counter rows whose window has expired
    pub async fn cleanup_expired(&self) -> Result<u64, CounterStoreError> {
        let now_ms = Utc::now().timestamp_millis();

        let deleted = sqlx::query("DELETE FROM guard_rate_limits WHERE expires_at_ms < $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| CounterStoreError::backend(BACKEND, e))?
            .rows_affected();

        tracing::info!(rate_limits = deleted, "Cleaned up expired rate limit counters");

        Ok(deleted)
    }
}

/// Expiry for a row first written at `now_ms`
fn expires_at_ms(now_ms: i64, window_secs: u64) -> i64 {
    let window_ms = i64::try_from(window_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    now_ms.saturating_add(window_ms)
}

impl CounterStore for PgCounterStore {
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        window_secs: u64,
    ) -> Result<u64, CounterStoreError> {
        let bucket = i64::try_from(bucket).map_err(|_| CounterStoreError::InvalidResponse {
            backend: BACKEND,
            detail: format!("bucket {bucket} out of range"),
        })?;
        let expires_at = expires_at_ms(Utc::now().timestamp_millis(), window_secs);

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO guard_rate_limits (limit_key, bucket, request_count, expires_at_ms)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (limit_key, bucket)
            DO UPDATE SET request_count = guard_rate_limits.request_count + 1
            RETURNING request_count
            "#,
        )
        .bind(key)
        .bind(bucket)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CounterStoreError::backend(BACKEND, e))?;

        u64::try_from(row.0).map_err(|_| CounterStoreError::InvalidResponse {
            backend: BACKEND,
            detail: format!("negative count {}", row.0),
        })
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
