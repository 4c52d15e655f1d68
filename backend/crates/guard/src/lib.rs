//! Request Guard Module
//!
//! Clean Architecture structure:
//! - `domain/` - Session identity and the session lookup seam
//! - `application/` - Configuration, rate limiter, CSRF token service
//! - `infra/` - Counter stores (in-process, Redis, PostgreSQL)
//! - `presentation/` - Middleware, headers, handlers, router
//!
//! ## Security Model
//! - Unsafe methods need a CSRF token in a custom header, bound to the session by HMAC
//! - Tokens are derived, never stored; rotating the secret revokes all of them
//! - Rate limit counters are incremented atomically at the store, one round trip per request
//! - Both checks run before the protected handler; a rejection never reaches it

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::{ConfigError, CounterStoreConfig, GuardConfig, StoreFailurePolicy};
pub use application::csrf::{CsrfTokenService, CsrfVerification};
pub use application::rate_limiter::{RateLimiter, RateLimiterSettings};
pub use domain::session::{CookieSessionResolver, SessionResolver, SessionToken};
pub use error::{GuardError, GuardResult};
pub use infra::memory::MemoryCounterStore;
pub use infra::postgres::PgCounterStore;
pub use infra::redis::RedisCounterStore;
pub use presentation::headers::RateLimitHeaders;
pub use presentation::middleware::{RateLimitPolicy, RateLimitSubject};
pub use presentation::router::{Guard, guard_router};

pub use platform::rate_limit::{CounterStore, CounterStoreError, RateLimitResult, RateLimitWindow};

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

#[cfg(test)]
mod tests;
