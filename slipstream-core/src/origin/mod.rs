//! Client for the origin control API.
//!
//! The origin is the external backend that owns and serves the actual media
//! bytes for a content session. Everything here is a thin typed layer over
//! its HTTP control surface; transport failures collapse into a single
//! `OriginError::Unavailable` kind and callers fall back rather than retry.

mod http;
mod items;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

pub use http::HttpOriginClient;
pub use items::{PLACEHOLDER_ITEM_COUNT, format_bytes};

use crate::config::OriginConfig;
use crate::locator::{ContentHash, LocatorError};

/// Readiness ordinal at which a session can serve playback.
///
/// The origin reports 0 = added, 1 = fetching metadata, 2 = working,
/// 3 = fully working.
pub const READY_STATE: i64 = 2;

/// Errors from origin control-API calls.
#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("Origin unavailable: {reason}")]
    Unavailable { reason: String },

    #[error(transparent)]
    Locator(#[from] LocatorError),
}

/// A session registered at the origin.
#[derive(Debug, Clone, Serialize)]
pub struct OriginSession {
    pub hash: ContentHash,
    pub title: String,
}

/// Origin-reported state of one session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: i64,
    pub state_text: String,
}

impl SessionStatus {
    /// Whether the session has reached the playable threshold state.
    pub fn is_ready(&self) -> bool {
        self.state >= READY_STATE
    }
}

/// Result of the origin health check.
#[derive(Debug, Clone, Serialize)]
pub struct OriginHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OriginHealth {
    pub fn online(version: Option<String>) -> Self {
        Self {
            status: "online",
            version,
            error: None,
        }
    }

    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            status: "offline",
            version: None,
            error: Some(error.into()),
        }
    }
}

/// One file within a session eligible for video playback.
///
/// Materialized the first time a session's item list is requested and
/// immutable afterwards. The URLs point back at the local proxy so playback
/// never talks to the origin directly.
#[derive(Debug, Clone, Serialize)]
pub struct PlayableItem {
    pub index: u64,
    pub name: String,
    pub size: u64,
    pub size_formatted: String,
    pub content_type: String,
    pub stream_url: String,
    pub transcode_url: String,
    pub playlist_url: String,
    pub preload_url: String,
}

/// Typed operations against the origin control API.
///
/// Abstracted as a trait so the registry sweep and request handlers can be
/// exercised against an in-memory origin in tests.
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// Submits a locator to the origin and returns the session identity.
    ///
    /// On transport failure the locally resolved hash is returned anyway so
    /// playback can still be attempted while the origin assembles content.
    ///
    /// # Errors
    /// - `OriginError::Locator` - The locator does not embed a content hash
    async fn create_session(
        &self,
        locator: &str,
        title: Option<&str>,
    ) -> Result<OriginSession, OriginError>;

    /// Fetches the origin-reported status of one session, if known.
    ///
    /// # Errors
    /// - `OriginError::Unavailable` - Transport or protocol failure
    async fn session_status(
        &self,
        hash: ContentHash,
    ) -> Result<Option<SessionStatus>, OriginError>;

    /// Lists a session's playable items.
    ///
    /// Tries origin data sources in order and degrades to a bounded
    /// placeholder list when the origin cannot supply structured data, so
    /// the caller always receives something playable.
    async fn list_items(&self, hash: ContentHash) -> Result<Vec<PlayableItem>, OriginError>;

    /// Tears the session down at the origin. Idempotent: destroying an
    /// already-gone session is not an error.
    ///
    /// # Errors
    /// - `OriginError::Unavailable` - Transport failure
    async fn destroy_session(&self, hash: ContentHash) -> Result<(), OriginError>;

    /// Health check against the origin.
    async fn health(&self) -> OriginHealth;

    /// Builds the origin URL serving raw stream bytes for a proxy request.
    fn stream_url(&self, path: &str, query: &str) -> String;
}

/// Polls session status until it reports ready or `ready_max_wait` elapses.
///
/// Best-effort by design: callers proceed either way, the return value only
/// says whether readiness was confirmed.
pub async fn wait_until_ready(
    client: &dyn OriginClient,
    hash: ContentHash,
    config: &OriginConfig,
) -> bool {
    let deadline = tokio::time::Instant::now() + config.ready_max_wait;

    loop {
        match client.session_status(hash).await {
            Ok(Some(status)) if status.is_ready() => {
                debug!("Session {hash} ready: {}", status.state_text);
                return true;
            }
            Ok(Some(status)) => {
                debug!("Session {hash} not ready yet: {}", status.state_text);
            }
            Ok(None) => debug!("Session {hash} not listed by origin yet"),
            Err(e) => debug!("Status poll failed for {hash}: {e}"),
        }

        if tokio::time::Instant::now() + config.ready_poll_interval > deadline {
            debug!("Session {hash} not ready after max wait; proceeding anyway");
            return false;
        }
        tokio::time::sleep(config.ready_poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Origin stub whose session becomes ready after a fixed number of polls.
    struct EventuallyReady {
        polls: AtomicUsize,
        ready_after: usize,
    }

    #[async_trait]
    impl OriginClient for EventuallyReady {
        async fn create_session(
            &self,
            _locator: &str,
            _title: Option<&str>,
        ) -> Result<OriginSession, OriginError> {
            unimplemented!()
        }

        async fn session_status(
            &self,
            _hash: ContentHash,
        ) -> Result<Option<SessionStatus>, OriginError> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if seen >= self.ready_after {
                Ok(Some(SessionStatus {
                    state: READY_STATE,
                    state_text: "working".to_string(),
                }))
            } else {
                Ok(Some(SessionStatus {
                    state: 1,
                    state_text: "fetching metadata".to_string(),
                }))
            }
        }

        async fn list_items(&self, _hash: ContentHash) -> Result<Vec<PlayableItem>, OriginError> {
            Ok(Vec::new())
        }

        async fn destroy_session(&self, _hash: ContentHash) -> Result<(), OriginError> {
            Ok(())
        }

        async fn health(&self) -> OriginHealth {
            OriginHealth::offline("stub")
        }

        fn stream_url(&self, _path: &str, _query: &str) -> String {
            String::new()
        }
    }

    fn poll_config() -> OriginConfig {
        OriginConfig {
            ready_poll_interval: Duration::from_secs(2),
            ready_max_wait: Duration::from_secs(30),
            ..OriginConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_confirmed_after_polling() {
        let client = EventuallyReady {
            polls: AtomicUsize::new(0),
            ready_after: 3,
        };

        let ready = wait_until_ready(&client, ContentHash::new([9; 20]), &poll_config()).await;

        assert!(ready);
        assert_eq!(client.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_is_bounded() {
        let client = EventuallyReady {
            polls: AtomicUsize::new(0),
            ready_after: usize::MAX,
        };

        let started = tokio::time::Instant::now();
        let ready = wait_until_ready(&client, ContentHash::new([9; 20]), &poll_config()).await;

        assert!(!ready);
        assert!(started.elapsed() <= Duration::from_secs(31));
        // Polls happen every 2s within the 30s budget.
        assert!(client.polls.load(Ordering::SeqCst) >= 14);
    }

    #[test]
    fn ready_threshold_matches_working_states() {
        let fetching = SessionStatus {
            state: 1,
            state_text: String::new(),
        };
        let working = SessionStatus {
            state: 2,
            state_text: String::new(),
        };
        let full = SessionStatus {
            state: 3,
            state_text: String::new(),
        };

        assert!(!fetching.is_ready());
        assert!(working.is_ready());
        assert!(full.is_ready());
    }
}
