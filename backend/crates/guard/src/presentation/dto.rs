//! API DTOs (Data Transfer Objects)

use serde::Serialize;

/// 429 body: `{ success: false, error: "RATE_LIMITED", message, retryAfter }`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
    pub retry_after: u64,
}

impl RateLimitedBody {
    pub fn new(retry_after: u64) -> Self {
        Self {
            success: false,
            error: "RATE_LIMITED",
            message: format!("Too many requests. Try again in {retry_after} seconds."),
            retry_after,
        }
    }
}

/// `{ success: false, error: { code } }`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorCodeBody {
    pub success: bool,
    pub error: ErrorCode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCode {
    pub code: &'static str,
}

impl ErrorCodeBody {
    pub fn new(code: &'static str) -> Self {
        Self {
            success: false,
            error: ErrorCode { code },
        }
    }
}

/// Response for GET /csrf-token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub success: bool,
    pub csrf_token: String,
    pub header_name: String,
}
