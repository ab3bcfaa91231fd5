//! Slipstream HTTP server assembly.
//!
//! Owned components (registry, stores, prober, transcode manager, origin
//! client) are constructed here and injected into handlers through axum
//! state; the idle sweep runs as a background task tied to server shutdown.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get, post, put};
use lru::LruCache;
use parking_lot::Mutex;
use slipstream_core::config::SlipstreamConfig;
use slipstream_core::locator::ContentHash;
use slipstream_core::media::{CodecReport, FfprobeProber, MediaProber, TranscodeManager};
use slipstream_core::origin::{HttpOriginClient, OriginClient};
use slipstream_core::playback::{PositionStore, WatchedStore};
use slipstream_core::session::{SessionRegistry, spawn_sweep};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers::{api, positions, proxy, transcode};

/// Codec verdicts kept per (session, item); sessions are short-lived so a
/// small cache is plenty.
const CODEC_CACHE_CAPACITY: usize = 256;

type CodecCache = Mutex<LruCache<(ContentHash, u64), CodecReport>>;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: SlipstreamConfig,
    pub registry: Arc<SessionRegistry>,
    pub origin: Arc<dyn OriginClient>,
    pub prober: Arc<dyn MediaProber>,
    pub transcoder: Arc<TranscodeManager>,
    pub positions: Arc<PositionStore>,
    pub watched: Arc<WatchedStore>,
    pub codec_cache: Arc<CodecCache>,
    pub http: reqwest::Client,
    pub started_at: Instant,
}

impl AppState {
    /// Builds production state from configuration.
    ///
    /// # Errors
    /// Fails when the playback stores cannot be opened.
    pub fn from_config(config: SlipstreamConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let origin: Arc<dyn OriginClient> = Arc::new(HttpOriginClient::new(config.origin.clone()));
        let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(
            config.transcode.clone(),
            config.origin.credentials(),
        ));
        let transcoder = Arc::new(TranscodeManager::new(
            config.transcode.clone(),
            config.origin.credentials(),
        ));
        let positions = Arc::new(PositionStore::load(&config.playback)?);
        let watched = Arc::new(WatchedStore::load(&config.playback)?);

        Ok(Self {
            registry: Arc::new(SessionRegistry::new()),
            origin,
            prober,
            transcoder,
            positions,
            watched,
            codec_cache: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(CODEC_CACHE_CAPACITY).expect("nonzero cache capacity"),
            ))),
            http: reqwest::Client::new(),
            started_at: Instant::now(),
            config,
        })
    }
}

/// Builds the full API router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/play", post(api::play))
        .route("/api/sessions", get(api::sessions_list))
        .route("/api/sessions/{hash}/files", get(api::session_files))
        .route("/api/sessions/{hash}", delete(api::session_remove))
        .route("/api/status", get(api::origin_status))
        // Streaming
        .route("/api/stream/{*path}", get(proxy::proxy_stream))
        .route(
            "/api/transcode/{*path}",
            get(transcode::transcode_stream).head(transcode::transcode_head),
        )
        .route("/api/check-codec/{*path}", get(transcode::check_codec))
        // Playback progress
        .route("/api/positions/validate", post(positions::validate_positions))
        .route(
            "/api/positions/{hash}/{index}",
            get(positions::get_position)
                .put(positions::put_position)
                .delete(positions::delete_position),
        )
        .route("/api/watched/{hash}", get(positions::get_watched))
        .route("/api/watched/{hash}/{index}", put(positions::put_watched))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the server until a shutdown signal arrives, then stops the sweep.
///
/// # Errors
/// Fails when the stores cannot be opened or the listener cannot bind.
pub async fn run_server(
    config: SlipstreamConfig,
    bind: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = spawn_sweep(
        state.registry.clone(),
        state.origin.clone(),
        state.config.registry.clone(),
        shutdown_rx,
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Slipstream proxy listening on http://{bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    sweep.await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received: closing HTTP server");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use slipstream_core::config::PlaybackConfig;
    use slipstream_core::media::ProbeError;
    use slipstream_core::origin::{
        OriginError, OriginHealth, OriginSession, PlayableItem, SessionStatus,
    };
    use slipstream_core::locator;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    use super::*;

    const HASH: &str = "aabbccddeeff00112233445566778899aabbccdd";

    struct StubOrigin;

    #[async_trait]
    impl OriginClient for StubOrigin {
        async fn create_session(
            &self,
            locator: &str,
            title: Option<&str>,
        ) -> Result<OriginSession, OriginError> {
            let hash = locator::resolve_content_hash(locator)?;
            let title = title
                .map(str::to_owned)
                .or_else(|| locator::display_title(locator))
                .unwrap_or_else(|| "Unknown".to_string());
            Ok(OriginSession { hash, title })
        }

        async fn session_status(
            &self,
            _hash: ContentHash,
        ) -> Result<Option<SessionStatus>, OriginError> {
            Ok(Some(SessionStatus {
                state: 3,
                state_text: "working".to_string(),
            }))
        }

        async fn list_items(&self, _hash: ContentHash) -> Result<Vec<PlayableItem>, OriginError> {
            Ok(Vec::new())
        }

        async fn destroy_session(&self, _hash: ContentHash) -> Result<(), OriginError> {
            Ok(())
        }

        async fn health(&self) -> OriginHealth {
            OriginHealth::online(Some("1.0-test".to_string()))
        }

        fn stream_url(&self, path: &str, query: &str) -> String {
            format!("http://origin.test/stream/{path}?{query}")
        }
    }

    struct StubProber {
        codec_calls: AtomicUsize,
        needs_transcode: bool,
    }

    #[async_trait]
    impl MediaProber for StubProber {
        async fn probe_codec(&self, _url: &str) -> Result<CodecReport, ProbeError> {
            self.codec_calls.fetch_add(1, Ordering::SeqCst);
            Ok(CodecReport {
                has_audio: true,
                audio_codec: Some("ac3".to_string()),
                needs_transcode: self.needs_transcode,
                reason: "incompatible codec: ac3".to_string(),
            })
        }

        async fn probe_duration(&self, _url: &str) -> Option<u64> {
            Some(3600)
        }
    }

    fn test_state(dir: &TempDir, prober: Arc<StubProber>) -> AppState {
        let config = SlipstreamConfig {
            playback: PlaybackConfig {
                data_dir: dir.path().to_path_buf(),
                ..PlaybackConfig::default()
            },
            ..SlipstreamConfig::default()
        };

        AppState {
            registry: Arc::new(SessionRegistry::new()),
            origin: Arc::new(StubOrigin),
            prober,
            transcoder: Arc::new(TranscodeManager::new(config.transcode.clone(), None)),
            positions: Arc::new(PositionStore::load(&config.playback).unwrap()),
            watched: Arc::new(WatchedStore::load(&config.playback).unwrap()),
            codec_cache: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(CODEC_CACHE_CAPACITY).unwrap(),
            ))),
            http: reqwest::Client::new(),
            started_at: Instant::now(),
            config,
        }
    }

    fn default_prober() -> Arc<StubProber> {
        Arc::new(StubProber {
            codec_calls: AtomicUsize::new(0),
            needs_transcode: true,
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn play_registers_session() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());
        let app = router(state.clone());

        let locator = format!("magnet:?xt=urn:btih:{HASH}&dn=Test+Show");
        let response = app
            .oneshot(json_request("POST", "/api/play", json!({ "locator": locator })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["hash"], HASH.to_uppercase());
        assert_eq!(body["title"], "Test Show");
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn play_rejects_malformed_locator() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());

        let response = router(state)
            .oneshot(json_request(
                "POST",
                "/api/play",
                json!({ "locator": "https://example.com/nothing" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn position_round_trip_through_api() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());
        let app = router(state);

        let uri = format!("/api/positions/{HASH}/0");
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &uri,
                json!({ "elapsed_secs": 120, "duration_secs": 3600 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["elapsed_secs"], 120);
        assert_eq!(body["duration_secs"], 3600);
    }

    #[tokio::test]
    async fn progress_past_threshold_marks_watched_once() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());
        let app = router(state.clone());

        let uri = format!("/api/positions/{HASH}/4");
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    "PUT",
                    &uri,
                    json!({ "elapsed_secs": 3300, "duration_secs": 3600 }),
                ))
                .await
                .unwrap();
            let body = body_json(response).await;
            assert_eq!(body["watched"], true);
        }

        let hash = ContentHash::from_hex(HASH).unwrap();
        assert_eq!(state.watched.watched_items(hash), vec![4]);
    }

    #[tokio::test]
    async fn early_progress_does_not_mark_watched() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());

        let uri = format!("/api/positions/{HASH}/4");
        let response = router(state.clone())
            .oneshot(json_request(
                "PUT",
                &uri,
                json!({ "elapsed_secs": 600, "duration_secs": 3600 }),
            ))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["watched"], false);
        let hash = ContentHash::from_hex(HASH).unwrap();
        assert!(state.watched.watched_items(hash).is_empty());
    }

    #[tokio::test]
    async fn codec_check_caches_successful_verdicts() {
        let dir = TempDir::new().unwrap();
        let prober = default_prober();
        let state = test_state(&dir, prober.clone());
        let app = router(state);

        let uri = format!("/api/check-codec/video?link={HASH}&index=0&play");
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            let body = body_json(response).await;
            assert_eq!(body["needs_transcode"], true);
            assert_eq!(body["audio_codec"], "ac3");
        }

        assert_eq!(prober.codec_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn codec_check_requires_item_identity() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/check-codec/video?play")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sessions_snapshot_reports_idle_state() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());
        state
            .registry
            .touch(ContentHash::from_hex(HASH).unwrap(), Some("Snapshot Show"));

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["inactivity_timeout_secs"], 180);
        assert_eq!(body["sessions"][0]["title"], "Snapshot Show");
    }

    #[tokio::test]
    async fn session_teardown_clears_registry() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, default_prober());
        let hash = ContentHash::from_hex(HASH).unwrap();
        state.registry.touch(hash, Some("Closing"));

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sessions/{HASH}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.registry.is_empty());
    }
}
