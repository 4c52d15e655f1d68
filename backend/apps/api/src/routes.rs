//! Sample routes behind the guard

use crate::AppResult;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json, Router};
use guard::{AppError, CounterStore, Guard, RateLimitPolicy, SessionToken};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message: String,
}

/// `/csrf-token`, `/workspaces` and `/feedback`
pub fn api_router<S>(guard: &Guard<S>) -> Router
where
    S: CounterStore + Send + Sync + 'static,
{
    let workspaces = guard.protect(
        Router::new().route("/workspaces", post(create_workspace)),
        RateLimitPolicy::per_session("create-workspace", 5, 3600),
    );

    let feedback = guard.protect(
        Router::new().route("/feedback", post(send_feedback)),
        RateLimitPolicy::per_ip("feedback", 3, 600),
    );

    Router::new()
        .merge(guard.router())
        .merge(workspaces)
        .merge(feedback)
}

/// POST /api/workspaces
async fn create_workspace(
    Extension(session): Extension<SessionToken>,
    Json(body): Json<CreateWorkspaceRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Workspace name is required"));
    }

    tracing::info!(session = %session.fingerprint(), name, "Workspace created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "workspace": { "name": name } })),
    ))
}

/// POST /api/feedback
async fn send_feedback(Json(body): Json<FeedbackRequest>) -> AppResult<Json<Value>> {
    if body.message.trim().is_empty() {
        return Err(AppError::bad_request("Feedback message is required"));
    }
    Ok(Json(json!({ "success": true })))
}
