//! Rate limit response headers
//!
//! `X-RateLimit-Reset` carries the window rollover as Unix seconds.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use platform::rate_limit::RateLimitResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Header values for one rate limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds
    pub reset_at: i64,
}

impl RateLimitHeaders {
    pub fn new(limit: u32, remaining: u32, reset_at: i64) -> Self {
        Self {
            limit,
            remaining: remaining.min(limit),
            reset_at: reset_at.max(0),
        }
    }

    /// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
    pub fn build(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(4);
        self.apply(&mut headers);
        headers
    }

    /// [`Self::build`] plus `Retry-After` for the rejecting response
    pub fn build_rejection(&self, retry_after: u64) -> HeaderMap {
        let mut headers = self.build();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        headers
    }

    /// Write the three headers into `headers`, replacing existing values
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at));
    }
}

impl From<&RateLimitResult> for RateLimitHeaders {
    fn from(result: &RateLimitResult) -> Self {
        Self::new(result.limit, result.remaining, result.reset_at_unix())
    }
}
