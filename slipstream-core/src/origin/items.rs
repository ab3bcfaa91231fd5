//! Playable-item normalization.
//!
//! Raw origin file rows become `PlayableItem`s with proxy-relative access
//! URLs. When the origin cannot supply structured data at all, a bounded
//! placeholder list keeps the session usable in degraded mode.

use serde::Deserialize;

use super::PlayableItem;
use crate::locator::ContentHash;

/// Container extensions accepted as video playback candidates.
const VIDEO_EXTENSIONS: [&str; 9] = [
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".ts",
];

/// Size of the synthesized item list when the origin supplies no file data.
pub const PLACEHOLDER_ITEM_COUNT: usize = 20;

/// One file row as reported by the origin, fields all best-effort.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawFileRow {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub length: Option<u64>,
}

fn has_video_extension(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

fn item_urls(hash: ContentHash, index: u64) -> (String, String, String, String) {
    let link = hash.to_query_form();
    (
        format!("/api/stream/video?link={link}&index={index}&play"),
        format!("/api/transcode/video?link={link}&index={index}&play"),
        format!("/api/stream/video?link={link}&index={index}&m3u"),
        format!("/api/stream/video?link={link}&index={index}&preload"),
    )
}

/// Converts origin file rows into playable items, keeping only video files.
pub(crate) fn normalize_items(rows: Vec<RawFileRow>, hash: ContentHash) -> Vec<PlayableItem> {
    rows.into_iter()
        .enumerate()
        .map(|(position, row)| {
            let index = row.id.unwrap_or(position as u64);
            let name = row
                .path
                .unwrap_or_else(|| format!("File {}", position + 1));
            let size = row.length.unwrap_or(0);
            let (stream_url, transcode_url, playlist_url, preload_url) = item_urls(hash, index);
            PlayableItem {
                index,
                content_type: mime_guess::from_path(&name)
                    .first_or_octet_stream()
                    .to_string(),
                size_formatted: format_bytes(size),
                name,
                size,
                stream_url,
                transcode_url,
                playlist_url,
                preload_url,
            }
        })
        .filter(|item| has_video_extension(&item.name))
        .collect()
}

/// Synthesizes a fixed-size item list for a session whose file layout the
/// origin could not report. Explicitly a degraded mode, not an error.
pub(crate) fn placeholder_items(hash: ContentHash, count: usize) -> Vec<PlayableItem> {
    (0..count as u64)
        .map(|index| {
            let (stream_url, transcode_url, playlist_url, preload_url) = item_urls(hash, index);
            PlayableItem {
                index,
                name: format!("Episode {}", index + 1),
                size: 0,
                size_formatted: "Unknown".to_string(),
                content_type: "video/x-matroska".to_string(),
                stream_url,
                transcode_url,
                playlist_url,
                preload_url,
            }
        })
        .collect()
}

/// Human-readable byte count with 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exponent = (((bytes as f64).ln() / 1024f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[exponent])
}
