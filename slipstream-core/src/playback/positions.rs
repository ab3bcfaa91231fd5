//! Persistent per-(session, item) playback positions.
//!
//! Records carry the elapsed offset, the known duration when discovered, the
//! transcoding-mode flag, and a last-write timestamp. Implausible records
//! are treated as corrupt and deleted, never repaired in place; stale
//! records expire on read.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::StoreError;
use crate::config::PlaybackConfig;
use crate::locator::ContentHash;

const POSITIONS_FILE: &str = "positions.json";

/// One saved playback position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub elapsed_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    pub transcoded: bool,
    pub updated_at: DateTime<Utc>,
}

/// A duration this short cannot explain this much watch time; the duration
/// was clearly mis-detected, so the whole record is untrustworthy.
fn is_corrupt(record: &PositionRecord) -> bool {
    let Some(duration) = record.duration_secs else {
        return false;
    };
    record.elapsed_secs > duration || (duration < 600 && record.elapsed_secs > 1200)
}

fn record_key(hash: ContentHash, index: u64) -> String {
    format!("{hash}:{index}")
}

/// Playback position store persisted as a single JSON document.
pub struct PositionStore {
    path: PathBuf,
    min_save_secs: u64,
    expiry: Duration,
    records: Mutex<HashMap<String, PositionRecord>>,
}

impl PositionStore {
    /// Loads the store, running the corruption-validation pass immediately.
    ///
    /// A missing document starts empty; an unreadable one is discarded with a
    /// warning (playback history is never worth failing startup over).
    ///
    /// # Errors
    /// - `StoreError::Io` - Data directory cannot be created or read
    pub fn load(config: &PlaybackConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir).map_err(|source| StoreError::Io {
            path: config.data_dir.clone(),
            source,
        })?;
        let path = config.data_dir.join(POSITIONS_FILE);

        let records = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding unreadable position document: {e}");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let store = Self {
            path,
            min_save_secs: config.min_save_secs,
            expiry: Duration::days(config.expiry_days),
            records: Mutex::new(records),
        };

        let removed = store.validate()?;
        if removed > 0 {
            info!("Startup validation removed {removed} corrupt position record(s)");
        }
        Ok(store)
    }

    /// Saves a position. Positions at or below the noise floor are ignored
    /// so accidental starts never clobber a real resume point. A previously
    /// known duration survives calls that do not supply one.
    ///
    /// # Errors
    /// - `StoreError::Io` / `StoreError::Encode` - Document rewrite failed
    pub fn save(
        &self,
        hash: ContentHash,
        index: u64,
        elapsed_secs: u64,
        transcoded: bool,
        duration_secs: Option<u64>,
    ) -> Result<(), StoreError> {
        if elapsed_secs <= self.min_save_secs {
            debug!("Ignoring noise position {elapsed_secs}s for {hash}:{index}");
            return Ok(());
        }

        let key = record_key(hash, index);
        let mut records = self.records.lock();
        let duration_secs = duration_secs.or_else(|| {
            records
                .get(&key)
                .and_then(|existing| existing.duration_secs)
        });
        records.insert(
            key,
            PositionRecord {
                elapsed_secs,
                duration_secs,
                transcoded,
                updated_at: Utc::now(),
            },
        );
        self.persist(&records)
    }

    /// Returns the saved position, expiring records unread for too long as a
    /// read-side effect.
    ///
    /// # Errors
    /// - `StoreError::Io` / `StoreError::Encode` - Expiry rewrite failed
    pub fn get(
        &self,
        hash: ContentHash,
        index: u64,
    ) -> Result<Option<PositionRecord>, StoreError> {
        let key = record_key(hash, index);
        let mut records = self.records.lock();

        let expired = records
            .get(&key)
            .is_some_and(|record| Utc::now() - record.updated_at > self.expiry);
        if expired {
            debug!("Expiring stale position record {key}");
            records.remove(&key);
            self.persist(&records)?;
            return Ok(None);
        }

        Ok(records.get(&key).cloned())
    }

    /// Deletes a position record (used when playback finishes or ends).
    ///
    /// # Errors
    /// - `StoreError::Io` / `StoreError::Encode` - Document rewrite failed
    pub fn clear(&self, hash: ContentHash, index: u64) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.remove(&record_key(hash, index)).is_some() {
            self.persist(&records)?;
        }
        Ok(())
    }

    /// Deletes every record whose offset/duration combination is implausible.
    /// Returns the number of records removed.
    ///
    /// # Errors
    /// - `StoreError::Io` / `StoreError::Encode` - Document rewrite failed
    pub fn validate(&self) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|key, record| {
            if is_corrupt(record) {
                warn!(
                    "Deleting corrupt position record {key}: elapsed {}s, duration {:?}s",
                    record.elapsed_secs, record.duration_secs
                );
                false
            } else {
                true
            }
        });
        let removed = before - records.len();
        if removed > 0 {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn persist(&self, records: &HashMap<String, PositionRecord>) -> Result<(), StoreError> {
        let document = serde_json::to_string_pretty(records)
            .map_err(|source| StoreError::Encode { source })?;
        fs::write(&self.path, document).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    #[cfg(test)]
    fn insert_raw(&self, hash: ContentHash, index: u64, record: PositionRecord) {
        self.records.lock().insert(record_key(hash, index), record);
    }
}
