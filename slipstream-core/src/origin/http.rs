//! HTTP implementation of the origin client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::items::{self, RawFileRow};
use super::{
    OriginClient, OriginError, OriginHealth, OriginSession, PlayableItem, SessionStatus,
};
use crate::config::OriginConfig;
use crate::locator::{self, ContentHash};

/// Production origin client speaking the origin's JSON control API.
pub struct HttpOriginClient {
    http: reqwest::Client,
    config: OriginConfig,
    base_url: String,
}

/// One session row from the origin's list response.
#[derive(Debug, Deserialize)]
struct SessionRow {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    stat: Option<i64>,
    #[serde(default)]
    stat_string: Option<String>,
    /// Origin-internal state blob, JSON encoded as a string.
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedSessionData {
    #[serde(rename = "TorrServer")]
    server: Option<EmbeddedFileList>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedFileList {
    #[serde(rename = "Files")]
    files: Option<Vec<RawFileRow>>,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    #[serde(default)]
    file_stats: Option<Vec<RawFileRow>>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    version: Option<String>,
}

/// Ordered data sources for a session's file list.
#[derive(Debug, Clone, Copy)]
enum ItemSource {
    /// File list embedded in the origin's session list entry.
    SessionData,
    /// Detailed per-session stat call.
    DetailedStat,
}

fn unavailable(e: reqwest::Error) -> OriginError {
    OriginError::Unavailable {
        reason: e.to_string(),
    }
}

/// Extracts file rows from the origin's embedded session data blob.
fn parse_embedded_files(data: &str) -> Option<Vec<RawFileRow>> {
    let parsed: EmbeddedSessionData = serde_json::from_str(data).ok()?;
    parsed.server.and_then(|server| server.files)
}

impl HttpOriginClient {
    pub fn new(config: OriginConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            config,
            base_url,
        }
    }

    fn control_url(&self) -> String {
        format!("{}/torrents", self.base_url)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.credentials() {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    async fn post_control(
        &self,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, OriginError> {
        let request = self.http.post(self.control_url()).timeout(timeout).json(&body);
        let response = self.apply_auth(request).send().await.map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(OriginError::Unavailable {
                reason: format!("origin returned {}", response.status()),
            });
        }
        Ok(response)
    }

    async fn fetch_sessions(&self) -> Result<Vec<SessionRow>, OriginError> {
        let response = self
            .post_control(json!({ "action": "list" }), self.config.control_timeout)
            .await?;
        response.json().await.map_err(unavailable)
    }

    async fn find_session(&self, hash: ContentHash) -> Result<Option<SessionRow>, OriginError> {
        let target = hash.to_query_form();
        Ok(self.fetch_sessions().await?.into_iter().find(|row| {
            row.hash
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(&target))
        }))
    }

    async fn submit_session(&self, locator: &str, title: &str) -> Result<(), OriginError> {
        self.post_control(
            json!({
                "action": "add",
                "link": locator,
                "title": title,
                "poster": "",
                "save_to_db": true,
            }),
            self.config.create_timeout,
        )
        .await?;
        Ok(())
    }

    async fn raw_items(
        &self,
        source: ItemSource,
        hash: ContentHash,
    ) -> Result<Option<Vec<RawFileRow>>, OriginError> {
        match source {
            ItemSource::SessionData => {
                let Some(row) = self.find_session(hash).await? else {
                    return Ok(None);
                };
                Ok(row.data.as_deref().and_then(parse_embedded_files))
            }
            ItemSource::DetailedStat => {
                let lowered = hash.to_query_form();
                let request = self
                    .http
                    .post(format!("{}/stat", self.base_url))
                    .timeout(self.config.stat_timeout)
                    .json(&json!({
                        "hash": lowered,
                        "link": format!("magnet:?xt=urn:btih:{lowered}"),
                    }));
                let response = self.apply_auth(request).send().await.map_err(unavailable)?;
                if !response.status().is_success() {
                    return Err(OriginError::Unavailable {
                        reason: format!("origin returned {}", response.status()),
                    });
                }
                let stat: StatResponse = response.json().await.map_err(unavailable)?;
                Ok(stat.file_stats)
            }
        }
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
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

        info!("Registering session {title} ({hash}) at origin");
        if let Err(e) = self.submit_session(locator, &title).await {
            // The origin may still pick the content up asynchronously, so the
            // resolved hash is returned for a playback attempt regardless.
            warn!("Origin rejected session submit for {hash}: {e}; proceeding with resolved hash");
        }

        Ok(OriginSession { hash, title })
    }

    async fn session_status(
        &self,
        hash: ContentHash,
    ) -> Result<Option<SessionStatus>, OriginError> {
        Ok(self.find_session(hash).await?.map(|row| SessionStatus {
            state: row.stat.unwrap_or(0),
            state_text: row.stat_string.unwrap_or_default(),
        }))
    }

    async fn list_items(&self, hash: ContentHash) -> Result<Vec<PlayableItem>, OriginError> {
        for source in [ItemSource::SessionData, ItemSource::DetailedStat] {
            match self.raw_items(source, hash).await {
                Ok(Some(rows)) if !rows.is_empty() => {
                    let items = items::normalize_items(rows, hash);
                    debug!(
                        "Resolved {} playable item(s) for {hash} via {source:?}",
                        items.len()
                    );
                    return Ok(items);
                }
                Ok(_) => debug!("No file data for {hash} via {source:?}"),
                Err(e) => debug!("Item lookup via {source:?} failed for {hash}: {e}"),
            }
        }

        info!("Origin supplied no file data for {hash}; synthesizing placeholder list");
        Ok(items::placeholder_items(
            hash,
            items::PLACEHOLDER_ITEM_COUNT,
        ))
    }

    async fn destroy_session(&self, hash: ContentHash) -> Result<(), OriginError> {
        debug!("Destroying origin session {hash}");
        let request = self
            .http
            .post(self.control_url())
            .timeout(self.config.control_timeout)
            .json(&json!({ "action": "rem", "hash": hash.to_query_form() }));
        let response = self.apply_auth(request).send().await.map_err(unavailable)?;

        // A session the origin no longer knows counts as destroyed.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(OriginError::Unavailable {
                reason: format!("origin returned {}", response.status()),
            })
        }
    }

    async fn health(&self) -> OriginHealth {
        let request = self
            .http
            .get(format!("{}/status", self.base_url))
            .timeout(self.config.health_timeout);
        match self.apply_auth(request).send().await {
            Ok(response) if response.status().is_success() => {
                let version = response
                    .json::<HealthResponse>()
                    .await
                    .ok()
                    .and_then(|health| health.version);
                OriginHealth::online(version)
            }
            Ok(response) => OriginHealth::offline(format!("origin returned {}", response.status())),
            Err(e) => OriginHealth::offline(e.to_string()),
        }
    }

    fn stream_url(&self, path: &str, query: &str) -> String {
        let path = path.trim_start_matches('/');
        let mut url = format!("{}/stream", self.base_url);
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpOriginClient {
        HttpOriginClient::new(OriginConfig {
            base_url: "http://origin.test:8090/".to_string(),
            ..OriginConfig::default()
        })
    }

    #[test]
    fn builds_stream_urls() {
        let client = client();

        assert_eq!(
            client.stream_url("video", "link=abc&index=0&play"),
            "http://origin.test:8090/stream/video?link=abc&index=0&play"
        );
        assert_eq!(client.stream_url("", ""), "http://origin.test:8090/stream");
    }

    #[test]
    fn parses_embedded_file_list() {
        let data = r#"{
            "TorrServer": {
                "Files": [
                    {"id": 1, "path": "Show.S01E01.mkv", "length": 731906048},
                    {"id": 2, "path": "Show.S01E02.mkv", "length": 720123904}
                ]
            }
        }"#;

        let rows = parse_embedded_files(data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path.as_deref(), Some("Show.S01E01.mkv"));
        assert_eq!(rows[1].length, Some(720_123_904));
    }

    #[test]
    fn malformed_embedded_data_is_none() {
        assert!(parse_embedded_files("not json").is_none());
        assert!(parse_embedded_files(r#"{"TorrServer": {}}"#).is_none());
    }

    #[test]
    fn deserializes_session_rows() {
        let body = r#"[
            {"hash": "aabbccddeeff00112233445566778899aabbccdd",
             "title": "Show", "stat": 3, "stat_string": "Torrent working"}
        ]"#;

        let rows: Vec<SessionRow> = serde_json::from_str(body).unwrap();
        assert_eq!(rows[0].stat, Some(3));
        assert_eq!(rows[0].stat_string.as_deref(), Some("Torrent working"));
    }

    #[tokio::test]
    async fn create_session_falls_back_to_resolved_hash() {
        // Port 9 is discard/unassigned; the connect fails immediately and the
        // client must still hand back the locally resolved identity.
        let client = HttpOriginClient::new(OriginConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            create_timeout: Duration::from_millis(500),
            ..OriginConfig::default()
        });

        let locator = "magnet:?xt=urn:btih:aabbccddeeff00112233445566778899aabbccdd&dn=Fallback+Show";
        let session = client.create_session(locator, None).await.unwrap();

        assert_eq!(
            session.hash.to_string(),
            "AABBCCDDEEFF00112233445566778899AABBCCDD"
        );
        assert_eq!(session.title, "Fallback Show");
    }

    #[tokio::test]
    async fn create_session_rejects_malformed_locator() {
        let client = client();
        let result = client.create_session("https://example.com/not-a-magnet", None).await;
        assert!(matches!(result, Err(OriginError::Locator(_))));
    }
}
