//! Slipstream Core - Media-session lifecycle and transcoding proxy
//!
//! This crate provides the building blocks for streaming media served by a
//! remote bulk-download origin: content-hash resolution, active-session
//! tracking with idle eviction, the origin control-API client, codec
//! compatibility probing, supervised audio-repair transcoding, and persistent
//! playback position tracking.

pub mod config;
pub mod locator;
pub mod media;
pub mod origin;
pub mod playback;
pub mod session;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::SlipstreamConfig;
pub use locator::{ContentHash, LocatorError};
pub use media::{MediaProber, ProbeError, TranscodeError, TranscodeManager};
pub use origin::{OriginClient, OriginError};
pub use playback::{PositionStore, StoreError, WatchedStore};
pub use session::SessionRegistry;

/// Errors that can bubble up from any Slipstream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SlipstreamError {
    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("Origin error: {0}")]
    Origin(#[from] OriginError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SlipstreamError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SlipstreamError::Locator(e) => format!("Invalid link: {e}"),
            SlipstreamError::Origin(_) => "The streaming backend is unreachable".to_string(),
            SlipstreamError::Probe(_) => "Could not analyze the media stream".to_string(),
            SlipstreamError::Transcode(_) => "Audio conversion failed to start".to_string(),
            SlipstreamError::Store(_) => "Playback history is unavailable".to_string(),
            SlipstreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SlipstreamError::Locator(_))
    }
}

pub type Result<T> = std::result::Result<T, SlipstreamError>;
