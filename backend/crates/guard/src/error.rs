//! Guard Error Types
//!
//! Rejections raised by the CSRF and rate limit checks, rendered with the
//! exact envelopes clients depend on. Each variant also maps onto the
//! unified `kernel::error::AppError` system.

use crate::presentation::dto::{ErrorCodeBody, RateLimitedBody};
use crate::presentation::headers::RateLimitHeaders;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::rate_limit::{CounterStoreError, RateLimitResult};
use thiserror::Error;

/// Guard-specific result type alias
pub type GuardResult<T> = Result<T, GuardError>;

/// Guard rejection taxonomy
#[derive(Debug, Error)]
pub enum GuardError {
    /// Quota for the key is exhausted in the current window
    #[error("Rate limit exceeded")]
    RateLimited(RateLimitResult),

    /// Unsafe request without a CSRF token header
    #[error("CSRF token missing")]
    CsrfTokenMissing,

    /// CSRF token present but not valid for this session and key
    #[error("CSRF token invalid")]
    CsrfTokenInvalid,

    /// Unsafe request without a session
    #[error("Session required")]
    SessionRequired,

    /// Counter store failed and the fail-closed policy applies
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[source] CounterStoreError),
}

impl GuardError {
    /// Machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::RateLimited(_) => "RATE_LIMITED",
            GuardError::CsrfTokenMissing => "CSRF_TOKEN_MISSING",
            GuardError::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
            GuardError::SessionRequired => "SESSION_REQUIRED",
            // STORE_UNAVAILABLE is internal only
            GuardError::StoreUnavailable(_) => ErrorKind::ServiceUnavailable.code(),
        }
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::RateLimited(_) => ErrorKind::TooManyRequests,
            GuardError::CsrfTokenMissing | GuardError::CsrfTokenInvalid => ErrorKind::Forbidden,
            GuardError::SessionRequired => ErrorKind::Unauthorized,
            GuardError::StoreUnavailable(_) => ErrorKind::ServiceUnavailable,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            GuardError::StoreUnavailable(e) => {
                tracing::error!(error = %e, "Rejecting request: counter store unavailable");
            }
            GuardError::RateLimited(result) => {
                tracing::debug!(
                    limit = result.limit,
                    retry_after = result.retry_after,
                    "Responding 429"
                );
            }
            _ => {
                tracing::debug!(code = self.code(), "Guard rejected request");
            }
        }
    }
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            GuardError::StoreUnavailable(source) => AppError::new(kind, message).with_source(source),
            GuardError::RateLimited(_) => {
                AppError::new(kind, message).with_action("Retry after the window resets")
            }
            GuardError::CsrfTokenMissing | GuardError::CsrfTokenInvalid => {
                AppError::new(kind, message).with_action("Fetch a fresh CSRF token")
            }
            _ => AppError::new(kind, message),
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();

        match self {
            GuardError::RateLimited(result) => {
                let retry_after = result.retry_after.unwrap_or(0);
                let headers = RateLimitHeaders::from(&result).build_rejection(retry_after);

                let body = RateLimitedBody::new(retry_after);
                (status, headers, Json(body)).into_response()
            }
            other => (status, Json(ErrorCodeBody::new(other.code()))).into_response(),
        }
    }
}
