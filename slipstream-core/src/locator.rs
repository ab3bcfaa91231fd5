//! Content locator resolution.
//!
//! A locator is a user-supplied link that embeds a 40-hex-character content
//! hash after a `btih:` marker, optionally with a `dn=` display name. The
//! hash is the stable identity used everywhere else in the system.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker preceding the hex content hash inside a locator.
const HASH_MARKER: &str = "btih:";

/// 20-byte hash identifying one piece of content.
///
/// Parsed from 40 hex characters, case-insensitive. The canonical display
/// form is uppercase; origin-facing URLs use the lowercase form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 20]);

impl ContentHash {
    /// Creates a ContentHash from its raw 20 bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parses a 40-character hex string, accepting either case.
    ///
    /// # Errors
    /// - `LocatorError::MalformedLocator` - Wrong length or non-hex characters
    pub fn from_hex(s: &str) -> Result<Self, LocatorError> {
        if s.len() != 40 {
            return Err(LocatorError::MalformedLocator {
                reason: format!("content hash must be 40 hex characters, got {}", s.len()),
            });
        }
        let decoded = hex::decode(s).map_err(|_| LocatorError::MalformedLocator {
            reason: format!("content hash contains non-hex characters: {s}"),
        })?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Returns reference to the underlying 20 bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex form, as expected in origin stream URLs.
    pub fn to_query_form(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Errors produced while resolving a locator.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("Malformed locator: {reason}")]
    MalformedLocator { reason: String },
}

/// Extracts the content hash embedded in a locator string.
///
/// Looks for the 40 hex characters following the `btih:` marker (marker
/// matched case-insensitively) and normalizes them. Pure and deterministic.
///
/// # Errors
/// - `LocatorError::MalformedLocator` - Marker absent or hash invalid
pub fn resolve_content_hash(locator: &str) -> Result<ContentHash, LocatorError> {
    let lowered = locator.to_ascii_lowercase();
    let start = lowered
        .find(HASH_MARKER)
        .map(|pos| pos + HASH_MARKER.len())
        .ok_or_else(|| LocatorError::MalformedLocator {
            reason: "no content hash marker found".to_string(),
        })?;

    let candidate = locator
        .get(start..start + 40)
        .ok_or_else(|| LocatorError::MalformedLocator {
            reason: "locator truncated inside content hash".to_string(),
        })?;

    ContentHash::from_hex(candidate)
}

/// Extracts the display name (`dn=` parameter) from a locator, if present.
///
/// The value is percent-decoded and `+` is treated as a space, matching how
/// locators encode titles in practice.
pub fn display_title(locator: &str) -> Option<String> {
    for part in locator.split(['?', '&']) {
        if let Some(value) = part.strip_prefix("dn=") {
            let spaced = value.replace('+', " ");
            let decoded = urlencoding::decode(&spaced)
                .map(|cow| cow.into_owned())
                .unwrap_or(spaced);
            if !decoded.is_empty() {
                return Some(decoded);
            }
        }
    }
    None
}
