//! The HTTP error envelope
//!
//! Builds the uniform JSON error body and (with the `axum` feature)
//! renders [`AppError`] with it.

#[cfg(feature = "axum")]
use super::app_error::AppError;
use super::kind::ErrorKind;

/// Build the uniform error envelope body
///
/// `{ "success": false, "error": { "code": ..., "message": ..., "action": ... } }`
pub fn envelope(kind: ErrorKind, message: Option<&str>, action: Option<&str>) -> serde_json::Value {
    let mut error = serde_json::Map::new();
    error.insert("code".into(), kind.code().into());
    if let Some(message) = message {
        error.insert("message".into(), message.into());
    }
    if let Some(action) = action {
        error.insert("action".into(), action.into());
    }
    serde_json::json!({ "success": false, "error": error })
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::StatusCode;

        if self.kind().is_server_error() {
            tracing::error!(error = ?self, "Request failed with server error");
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Server-side details stay out of the body.
        let message = if self.kind().is_server_error() {
            None
        } else {
            Some(self.message())
        };

        let body = envelope(self.kind(), message, self.action());
        (status, Json(body)).into_response()
    }
}
