//! JSON API handlers for the session lifecycle.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use slipstream_core::locator::ContentHash;
use slipstream_core::origin::{OriginError, wait_until_ready};
use tracing::debug;

use super::error_response;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub locator: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Creates or reuses a playback session for a locator.
pub async fn play(State(state): State<AppState>, Json(request): Json<PlayRequest>) -> Response {
    if request.locator.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "locator is required");
    }

    match state
        .origin
        .create_session(&request.locator, request.title.as_deref())
        .await
    {
        Ok(session) => {
            state.registry.touch(session.hash, Some(&session.title));
            Json(json!({ "hash": session.hash, "title": session.title })).into_response()
        }
        Err(OriginError::Locator(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
    }
}

/// Lists a session's playable items, waiting (bounded) for origin readiness.
pub async fn session_files(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Response {
    let hash = match ContentHash::from_hex(&hash) {
        Ok(hash) => hash,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    state.registry.touch(hash, None);

    let ready = wait_until_ready(state.origin.as_ref(), hash, &state.config.origin).await;
    if !ready {
        debug!("Serving item list for {hash} before origin confirmed readiness");
    }

    match state.origin.list_items(hash).await {
        Ok(files) => Json(json!({ "files": files })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
    }
}

/// Observability snapshot of the active session registry.
pub async fn sessions_list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .map(|session| {
            json!({
                "hash": session.hash,
                "title": session.title,
                "idle_secs": session.idle.as_secs(),
            })
        })
        .collect();

    Json(json!({
        "count": sessions.len(),
        "inactivity_timeout_secs": state.config.registry.idle_timeout.as_secs(),
        "sessions": sessions,
    }))
}

/// Explicit session teardown (e.g. player closed).
///
/// The local registry entry goes away regardless; the response status
/// reflects whether the origin-side destroy went through.
pub async fn session_remove(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Response {
    let hash = match ContentHash::from_hex(&hash) {
        Ok(hash) => hash,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    state.registry.remove(hash);

    match state.origin.destroy_session(hash).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
    }
}

/// Origin health plus local uptime.
pub async fn origin_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let origin = state.origin.health().await;
    Json(json!({
        "origin": origin,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
