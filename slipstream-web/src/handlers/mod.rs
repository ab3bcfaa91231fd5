//! HTTP handlers for the Slipstream API surface

pub mod api;
pub mod positions;
pub mod proxy;
pub mod query;
pub mod transcode;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Uniform JSON error body.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
