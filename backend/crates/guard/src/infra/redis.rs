//! Redis Counter Store
//!
//! One round trip per check: a Lua script increments the window key and,
//! on the first increment, sets its expiry. Redis runs scripts atomically,
//! so racing requests on a fresh window cannot both observe "first write".

use platform::rate_limit::{CounterStore, CounterStoreError};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tokio::sync::OnceCell;

const BACKEND: &str = "redis";

const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// Redis-backed counter store
///
/// The connection is opened on first use and kept in a [`ConnectionManager`],
/// which reconnects by itself after it was established once. Until the first
/// connect succeeds, every call retries it; failures surface as store errors
/// and go through the limiter's suspension and failure policy.
pub struct RedisCounterStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    script: Script,
}

impl RedisCounterStore {
    /// Parse `url` without connecting
    pub fn open(url: &str) -> Result<Self, CounterStoreError> {
        let client = Client::open(url).map_err(|e| CounterStoreError::backend(BACKEND, e))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            script: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Open and connect to `url`
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let store = Self::open(url)?;
        store.connection().await?;
        Ok(store)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    /// Shared connection, connecting first if needed
    pub async fn connection(&self) -> Result<ConnectionManager, CounterStoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| CounterStoreError::backend(BACKEND, e))?;
                tracing::info!("Connected to Redis counter store");
                Ok::<_, CounterStoreError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

/// Redis key for `key` in `bucket`
pub fn window_key(key: &str, bucket: u64) -> String {
    format!("{key}:{bucket}")
}

impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        bucket: u64,
        window_secs: u64,
    ) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection().await?;
        let count: i64 = self
            .script
            .key(window_key(key, bucket))
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterStoreError::backend(BACKEND, e))?;

        u64::try_from(count).map_err(|_| CounterStoreError::InvalidResponse {
            backend: BACKEND,
            detail: format!("negative count {count}"),
        })
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
