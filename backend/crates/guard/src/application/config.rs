//! Application Configuration
//!
//! Every option the guard recognises lives in [`GuardConfig`].
//! Nothing else in the crate reads the environment.

use http::HeaderName;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What the rate limiter does when the shared counter store errors or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreFailurePolicy {
    /// Allow the request without counting it
    FailOpen,
    /// Count in the process-local fallback store (per-instance limits only)
    #[default]
    Fallback,
    /// Reject the request with 503
    FailClosed,
}

impl StoreFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreFailurePolicy::FailOpen => "open",
            StoreFailurePolicy::Fallback => "fallback",
            StoreFailurePolicy::FailClosed => "closed",
        }
    }
}

impl FromStr for StoreFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(StoreFailurePolicy::FailOpen),
            "fallback" => Ok(StoreFailurePolicy::Fallback),
            "closed" | "fail-closed" => Ok(StoreFailurePolicy::FailClosed),
            other => Err(ConfigError::Invalid {
                var: "RATE_LIMIT_FAILURE_POLICY",
                reason: format!("unknown policy '{other}' (expected open, fallback or closed)"),
            }),
        }
    }
}

/// Which shared counter store backs the rate limiter
#[derive(Clone, PartialEq, Eq, Default)]
pub enum CounterStoreConfig {
    /// No shared store; process-local counting only
    #[default]
    InProcess,
    Redis {
        url: String,
    },
    Postgres {
        url: String,
    },
}

impl fmt::Debug for CounterStoreConfig {
    // Connection URLs may embed credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterStoreConfig::InProcess => write!(f, "InProcess"),
            CounterStoreConfig::Redis { .. } => write!(f, "Redis {{ url: <redacted> }}"),
            CounterStoreConfig::Postgres { .. } => write!(f, "Postgres {{ url: <redacted> }}"),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Guard configuration
#[derive(Clone)]
pub struct GuardConfig {
    /// CSRF signing secret (32 bytes)
    pub csrf_secret: [u8; 32],
    /// Version tag embedded in tokens; bump together with the secret
    pub csrf_key_version: u8,
    /// Request header carrying the CSRF token
    pub csrf_header_name: HeaderName,
    /// Cookie carrying the session token
    pub session_cookie_name: String,
    /// Shared counter store
    pub store: CounterStoreConfig,
    /// Upper bound for one counter store call
    pub store_timeout: Duration,
    /// How long the store is skipped after a failure
    pub store_retry_after: Duration,
    /// Behaviour on store failure
    pub failure_policy: StoreFailurePolicy,
    /// Prefix for every counter key
    pub key_prefix: String,
    /// Reverse proxies in front of the service; 0 ignores `X-Forwarded-For`
    pub trusted_proxy_hops: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            csrf_secret: [0u8; 32],
            csrf_key_version: 1,
            csrf_header_name: HeaderName::from_static("x-csrf-token"),
            session_cookie_name: "session".to_string(),
            store: CounterStoreConfig::InProcess,
            store_timeout: Duration::from_millis(250),
            store_retry_after: Duration::from_secs(5),
            failure_policy: StoreFailurePolicy::Fallback,
            key_prefix: "rl:".to_string(),
            trusted_proxy_hops: 0,
        }
    }
}

impl fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardConfig")
            .field("csrf_secret", &"<redacted>")
            .field("csrf_key_version", &self.csrf_key_version)
            .field("csrf_header_name", &self.csrf_header_name)
            .field("session_cookie_name", &self.session_cookie_name)
            .field("store", &self.store)
            .field("store_timeout", &self.store_timeout)
            .field("store_retry_after", &self.store_retry_after)
            .field("failure_policy", &self.failure_policy)
            .field("key_prefix", &self.key_prefix)
            .field("trusted_proxy_hops", &self.trusted_proxy_hops)
            .finish()
    }
}

impl GuardConfig {
    /// Create config with a random CSRF secret (for development)
    pub fn with_random_secret() -> Self {
        Self {
            csrf_secret: platform::crypto::random_key(),
            ..Default::default()
        }
    }

    /// Create config for development (random secret, in-process counters)
    pub fn development() -> Self {
        Self::with_random_secret()
    }

    /// Load from process environment
    ///
    /// `CSRF_SECRET` is mandatory in release builds. Debug builds fall back
    /// to a random per-process secret.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok(), !cfg!(debug_assertions))
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F, require_secret: bool) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let csrf_secret = match get("CSRF_SECRET") {
            Some(encoded) => decode_secret(&encoded)?,
            None if require_secret => return Err(ConfigError::Missing("CSRF_SECRET")),
            None => platform::crypto::random_key(),
        };

        let csrf_key_version = match get("CSRF_KEY_VERSION") {
            Some(v) => v.trim().parse::<u8>().map_err(|e| ConfigError::Invalid {
                var: "CSRF_KEY_VERSION",
                reason: e.to_string(),
            })?,
            None => defaults.csrf_key_version,
        };

        let csrf_header_name = match get("CSRF_HEADER_NAME") {
            Some(v) => HeaderName::from_str(v.trim()).map_err(|e| ConfigError::Invalid {
                var: "CSRF_HEADER_NAME",
                reason: e.to_string(),
            })?,
            None => defaults.csrf_header_name,
        };

        let store = match get("RATE_LIMIT_STORE").as_deref().map(str::trim) {
            None | Some("memory") => CounterStoreConfig::InProcess,
            Some("redis") => CounterStoreConfig::Redis {
                url: get("REDIS_URL").ok_or(ConfigError::Missing("REDIS_URL"))?,
            },
            Some("postgres") => CounterStoreConfig::Postgres {
                url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "RATE_LIMIT_STORE",
                    reason: format!("unknown store '{other}' (expected memory, redis or postgres)"),
                });
            }
        };

        let failure_policy = match get("RATE_LIMIT_FAILURE_POLICY") {
            Some(v) => v.parse()?,
            None => defaults.failure_policy,
        };

        let trusted_proxy_hops = match get("TRUSTED_PROXY_HOPS") {
            Some(v) => v.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                var: "TRUSTED_PROXY_HOPS",
                reason: e.to_string(),
            })?,
            None => defaults.trusted_proxy_hops,
        };

        Ok(Self {
            csrf_secret,
            csrf_key_version,
            csrf_header_name,
            session_cookie_name: get("SESSION_COOKIE_NAME")
                .unwrap_or(defaults.session_cookie_name),
            store,
            store_timeout: millis(&get, "RATE_LIMIT_STORE_TIMEOUT_MS")?
                .unwrap_or(defaults.store_timeout),
            store_retry_after: millis(&get, "RATE_LIMIT_STORE_RETRY_AFTER_MS")?
                .unwrap_or(defaults.store_retry_after),
            failure_policy,
            key_prefix: get("RATE_LIMIT_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            trusted_proxy_hops,
        })
    }
}

fn decode_secret(encoded: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = platform::crypto::from_base64(encoded.trim()).map_err(|e| ConfigError::Invalid {
        var: "CSRF_SECRET",
        reason: e.to_string(),
    })?;

    bytes.try_into().map_err(|b: Vec<u8>| ConfigError::Invalid {
        var: "CSRF_SECRET",
        reason: format!("expected 32 bytes, got {}", b.len()),
    })
}

fn millis<G>(get: &G, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                })
        })
        .transpose()
}
