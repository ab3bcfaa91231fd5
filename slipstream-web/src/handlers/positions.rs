//! Playback position and watched-state handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use slipstream_core::locator::ContentHash;
use slipstream_core::playback::watched_threshold_reached;
use tracing::warn;

use super::error_response;
use crate::server::AppState;

fn parse_hash(hash: &str) -> Result<ContentHash, Response> {
    ContentHash::from_hex(hash)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct SavePositionRequest {
    pub elapsed_secs: u64,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub transcoded: bool,
}

pub async fn get_position(
    State(state): State<AppState>,
    Path((hash, index)): Path<(String, u64)>,
) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };

    match state.positions.get(hash, index) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Saves a progress report and drives watched marking.
///
/// An item crosses into the watched set the first time its observed
/// progress ratio reaches the configured threshold; marking is idempotent
/// and independent of the position record's own lifecycle.
pub async fn put_position(
    State(state): State<AppState>,
    Path((hash, index)): Path<(String, u64)>,
    Json(request): Json<SavePositionRequest>,
) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };

    if let Err(e) = state.positions.save(
        hash,
        index,
        request.elapsed_secs,
        request.transcoded,
        request.duration_secs,
    ) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    // The saved record may carry a duration learned earlier.
    let duration_secs = request.duration_secs.or_else(|| {
        state
            .positions
            .get(hash, index)
            .ok()
            .flatten()
            .and_then(|record| record.duration_secs)
    });

    let mut watched = false;
    if let Some(duration) = duration_secs {
        let ratio = state.config.playback.watched_ratio;
        if watched_threshold_reached(request.elapsed_secs, duration, ratio) {
            match state.watched.mark(hash, index) {
                Ok(_first_time) => watched = true,
                Err(e) => warn!("Failed to persist watched mark for {hash}:{index}: {e}"),
            }
        }
    }

    Json(json!({ "saved": true, "watched": watched })).into_response()
}

pub async fn delete_position(
    State(state): State<AppState>,
    Path((hash, index)): Path<(String, u64)>,
) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };

    match state.positions.clear(hash, index) {
        Ok(()) => Json(json!({ "cleared": true })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// On-demand corruption sweep over all position records.
pub async fn validate_positions(State(state): State<AppState>) -> Response {
    match state.positions.validate() {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

pub async fn get_watched(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };

    Json(json!({ "items": state.watched.watched_items(hash) })).into_response()
}

pub async fn put_watched(
    State(state): State<AppState>,
    Path((hash, index)): Path<(String, u64)>,
) -> Response {
    let hash = match parse_hash(&hash) {
        Ok(hash) => hash,
        Err(response) => return response,
    };

    match state.watched.mark(hash, index) {
        Ok(first_time) => {
            Json(json!({ "watched": true, "first_time": first_time })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
