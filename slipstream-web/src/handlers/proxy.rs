//! Stream passthrough proxy.
//!
//! Relays a byte-range playback request to the origin verbatim: the client's
//! `Range` header goes upstream, the origin's status (including 206 Partial
//! Content) and headers come back untouched, and the body streams through
//! without buffering.

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use slipstream_core::locator::ContentHash;
use tracing::{debug, error, warn};

use super::{error_response, query};
use crate::server::AppState;

/// Hop-by-hop headers hyper manages itself; everything else is copied.
fn is_hop_by_hop(name: &header::HeaderName) -> bool {
    name == header::CONNECTION || name == header::TRANSFER_ENCODING
}

pub async fn proxy_stream(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let query = raw_query.unwrap_or_default();

    // Playback traffic keeps the owning session alive across sweeps.
    if let Some(link) = query::query_param(&query, "link") {
        if let Ok(hash) = ContentHash::from_hex(link) {
            state.registry.touch(hash, None);
        }
    }

    let upstream_url = state.origin.stream_url(&path, &query);
    debug!(
        "Proxying stream request to {upstream_url} (range: {:?})",
        headers.get(header::RANGE)
    );

    let mut request = state.http.get(&upstream_url);
    if let Some((user, pass)) = state.config.origin.credentials() {
        request = request.basic_auth(user, Some(pass));
    }
    if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE, range.clone());
    }

    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Stream proxy failed for {upstream_url}: {e}");
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("failed to reach origin: {e}"),
            );
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                response_headers.insert(name.clone(), value.clone());
            }
        }
    }

    // Once headers are out an error can only be logged; HTTP cannot
    // downgrade a started response, the connection just closes.
    let body = Body::from_stream(
        upstream
            .bytes_stream()
            .inspect_err(|e| warn!("Stream body error: {e}")),
    );

    builder.body(body).unwrap_or_else(|e| {
        error!("Failed to assemble proxy response: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
