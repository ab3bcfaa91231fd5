//! Persistent watched set.
//!
//! Per session hash, the set of item indices the viewer has effectively
//! finished. Append-only per item: inserts are idempotent and entries are
//! never auto-removed, independent of whatever the position store says.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::StoreError;
use crate::config::PlaybackConfig;
use crate::locator::ContentHash;

const WATCHED_FILE: &str = "watched.json";

/// Watched-items store persisted as a single JSON document.
pub struct WatchedStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<u64>>>,
}

impl WatchedStore {
    /// Loads the store; a missing or unreadable document starts empty.
    ///
    /// # Errors
    /// - `StoreError::Io` - Data directory cannot be created or read
    pub fn load(config: &PlaybackConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir).map_err(|source| StoreError::Io {
            path: config.data_dir.clone(),
            source,
        })?;
        let path = config.data_dir.join(WATCHED_FILE);

        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding unreadable watched document: {e}");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Marks an item watched. Returns whether this was the first marking;
    /// repeat calls leave exactly one entry.
    ///
    /// # Errors
    /// - `StoreError::Io` / `StoreError::Encode` - Document rewrite failed
    pub fn mark(&self, hash: ContentHash, index: u64) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        let items = entries.entry(hash.to_string()).or_default();
        if items.contains(&index) {
            return Ok(false);
        }
        items.push(index);
        info!("Marked item {index} of {hash} as watched");
        self.persist(&entries)?;
        Ok(true)
    }

    pub fn is_watched(&self, hash: ContentHash, index: u64) -> bool {
        self.entries
            .lock()
            .get(&hash.to_string())
            .is_some_and(|items| items.contains(&index))
    }

    /// All watched item indices for a session, in marking order.
    pub fn watched_items(&self, hash: ContentHash) -> Vec<u64> {
        self.entries
            .lock()
            .get(&hash.to_string())
            .cloned()
            .unwrap_or_default()
    }

    fn persist(&self, entries: &HashMap<String, Vec<u64>>) -> Result<(), StoreError> {
        let document = serde_json::to_string_pretty(entries)
            .map_err(|source| StoreError::Encode { source })?;
        fs::write(&self.path, document).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
