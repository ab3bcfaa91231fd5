//! Playback progress tracking: positions, watched set and playback mode.
//!
//! Both stores persist as one structured JSON document per concern, rewritten
//! in full on every mutation, and are process-wide singletons guarded by a
//! single-writer mutex.

mod mode;
mod positions;
mod watched;

use std::path::PathBuf;

pub use mode::PlaybackMode;
pub use positions::{PositionRecord, PositionStore};
pub use watched::WatchedStore;

/// Errors from the persisted playback stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode store document: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Whether observed progress is far enough along to count as watched.
pub fn watched_threshold_reached(elapsed_secs: u64, duration_secs: u64, ratio: f64) -> bool {
    duration_secs > 0 && elapsed_secs as f64 / duration_secs as f64 >= ratio
}
