//! HTTP Handlers

use crate::error::{GuardError, GuardResult};
use crate::presentation::dto::CsrfTokenResponse;
use crate::presentation::middleware::CsrfState;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;

/// GET /csrf-token
///
/// Mints the token for the caller's current session. Tokens are derived,
/// not stored, so calling this again returns the same value until the
/// session or the signing key changes.
pub async fn issue_csrf_token(
    State(state): State<CsrfState>,
    headers: HeaderMap,
) -> GuardResult<impl IntoResponse> {
    let session = state
        .sessions
        .resolve(&headers)
        .ok_or(GuardError::SessionRequired)?;

    let csrf_token = state.tokens.generate(&session);
    tracing::debug!(session = %session.fingerprint(), "Issued CSRF token");

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(CsrfTokenResponse {
            success: true,
            csrf_token,
            header_name: state.header_name.to_string(),
        }),
    ))
}
