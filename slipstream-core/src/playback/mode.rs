//! Client-observable playback mode.

use serde::Serialize;

use crate::media::CodecReport;

/// How the current stream is being served.
///
/// The starting mode comes from the codec probe. A runtime playback error
/// forces the repair path; nothing transitions back to direct automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Origin bytes relayed unmodified.
    Direct,
    /// Audio re-encoded through the external transcoder.
    Transcoding,
}

impl PlaybackMode {
    /// Initial mode for a playback, decided once per start.
    pub fn from_probe(report: &CodecReport) -> Self {
        if report.needs_transcode {
            PlaybackMode::Transcoding
        } else {
            PlaybackMode::Direct
        }
    }

    /// Mode after a runtime playback error (e.g. decode failure). One-way:
    /// an already-transcoding stream stays transcoding.
    pub fn after_playback_error(self) -> Self {
        PlaybackMode::Transcoding
    }
}
