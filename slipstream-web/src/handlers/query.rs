//! Query-string helpers for proxied stream URLs.
//!
//! Origin stream URLs carry valueless flag parameters (`play`, `m3u`,
//! `preload`) that must be forwarded without a trailing `=`, so the raw
//! query string is manipulated textually instead of being re-encoded.

/// Rebuilds a raw query string with the named parameters removed, keeping
/// every other part byte-for-byte.
pub fn rebuild_query(raw: &str, exclude: &[&str]) -> String {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .filter(|part| {
            let key = part.split('=').next().unwrap_or(part);
            !exclude.contains(&key)
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the value of a query parameter, `Some("")` for valueless flags.
pub fn query_param<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.split('&').find_map(|part| {
        let mut split = part.splitn(2, '=');
        let key = split.next()?;
        if key == name {
            Some(split.next().unwrap_or(""))
        } else {
            None
        }
    })
}

/// Parses the seek offset in seconds; absent or unparsable means 0.
pub fn parse_seek(raw: &str) -> u64 {
    query_param(raw, "seek")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
