//! Transcode streaming and codec-check handlers.
//!
//! A transcode request spawns a supervised ffmpeg process whose stdout is
//! the response body. Seeking arrives as a `seek` query parameter and
//! restarts the process with an input-side offset; the first (non-seek)
//! request also probes the total duration and reports it in a header the
//! player reads, since a chunked transcoded stream has no length of its own.

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use slipstream_core::locator::ContentHash;
use slipstream_core::media::{CodecReport, StreamKey, TranscodeJob};
use tracing::{error, warn};

use super::{error_response, query};
use crate::server::AppState;

/// Header carrying the probed total duration in seconds.
pub const DURATION_HEADER: &str = "X-Video-Duration";

const MATROSKA_MIME: &str = "video/x-matroska";

/// Builds the per-playback process key from the request's query string.
fn stream_key_from_query(raw: &str) -> Option<StreamKey> {
    let hash = ContentHash::from_hex(query::query_param(raw, "link")?).ok()?;
    let index = query::query_param(raw, "index")?.parse().ok()?;
    Some(StreamKey { hash, index })
}

pub async fn transcode_stream(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let raw_query = raw_query.unwrap_or_default();
    let Some(key) = stream_key_from_query(&raw_query) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "link and index query parameters are required",
        );
    };
    state.registry.touch(key.hash, None);

    let seek_secs = query::parse_seek(&raw_query);
    // The origin never sees the seek parameter; it belongs to the transcoder.
    let upstream_query = query::rebuild_query(&raw_query, &["seek"]);
    let input_url = state.origin.stream_url(&path, &upstream_query);

    // First play discovers the duration; a seek cannot change it.
    let duration = if seek_secs == 0 {
        state.prober.probe_duration(&input_url).await
    } else {
        None
    };

    let job = TranscodeJob {
        input_url,
        seek_secs,
    };
    let stream = match state.transcoder.start(key, &job) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Transcode start failed for {key}: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MATROSKA_MIME);
    if let Some(secs) = duration {
        builder = builder.header(DURATION_HEADER, secs.to_string());
    }

    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            error!("Failed to assemble transcode response: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Duration discovery without starting a transcode.
pub async fn transcode_head(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let raw_query = raw_query.unwrap_or_default();
    let upstream_query = query::rebuild_query(&raw_query, &["seek"]);
    let url = state.origin.stream_url(&path, &upstream_query);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MATROSKA_MIME);
    if let Some(secs) = state.prober.probe_duration(&url).await {
        builder = builder.header(DURATION_HEADER, secs.to_string());
    }

    builder.body(Body::empty()).unwrap_or_else(|e| {
        error!("Failed to assemble duration response: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Audio-codec compatibility check for one playable item.
///
/// Successful verdicts are cached per (session, item) since the answer
/// cannot change for the session's lifetime; failed probes are not cached
/// so a not-yet-ready stream gets re-probed on the next attempt.
pub async fn check_codec(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let raw_query = raw_query.unwrap_or_default();
    let Some(key) = stream_key_from_query(&raw_query) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "link and index query parameters are required",
        );
    };
    state.registry.touch(key.hash, None);

    if let Some(report) = state.codec_cache.lock().get(&(key.hash, key.index)) {
        return Json(report.clone()).into_response();
    }

    let url = state.origin.stream_url(&path, &raw_query);
    match state.prober.probe_codec(&url).await {
        Ok(report) => {
            state
                .codec_cache
                .lock()
                .put((key.hash, key.index), report.clone());
            Json(report).into_response()
        }
        Err(e) => {
            warn!("Codec probe failed for {key}: {e}");
            Json(CodecReport::probe_failed(e.to_string())).into_response()
        }
    }
}
