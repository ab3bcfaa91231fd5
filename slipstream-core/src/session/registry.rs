//! In-memory registry of content sessions being watched.
//!
//! Every playback-related request refreshes its session's activity timestamp;
//! a background sweep destroys origin-side sessions that have gone idle so
//! backend resources are reclaimed once a stream is abandoned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::locator::ContentHash;
use crate::origin::OriginClient;

#[derive(Debug)]
struct SessionEntry {
    title: String,
    last_activity: Instant,
}

/// Observability snapshot of one registered session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub hash: ContentHash,
    pub title: String,
    pub idle: Duration,
}

/// Process-wide map of content hash → active session.
///
/// At most one entry exists per content hash. A touch never resurrects an
/// evicted session; a request arriving after eviction re-registers it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<ContentHash, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a session's activity timestamp.
    ///
    /// A provided title replaces the stored one; `None` keeps whatever title
    /// the entry already carries.
    pub fn touch(&self, hash: ContentHash, title: Option<&str>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&hash) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                if let Some(title) = title {
                    entry.title = title.to_string();
                }
            }
            None => {
                let title = title.unwrap_or("Unknown").to_string();
                debug!("Registering session {title} ({hash})");
                entries.insert(
                    hash,
                    SessionEntry {
                        title,
                        last_activity: Instant::now(),
                    },
                );
            }
        }
    }

    /// Removes a session entry, returning whether it existed.
    pub fn remove(&self, hash: ContentHash) -> bool {
        self.entries.lock().remove(&hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a snapshot of all registered sessions with their idle time.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.entries
            .lock()
            .iter()
            .map(|(hash, entry)| SessionSnapshot {
                hash: *hash,
                title: entry.title.clone(),
                idle: entry.last_activity.elapsed(),
            })
            .collect()
    }

    /// Evicts every session idle for longer than `idle_timeout`.
    ///
    /// The origin-side destroy is attempted first; its failure is logged and
    /// the entry is removed regardless, so eviction can never get stuck on a
    /// dead origin (the session may leak origin-side, which is accepted).
    /// Idleness is re-checked under the lock before removal so a touch that
    /// raced the destroy keeps the session registered.
    pub async fn sweep_once(&self, origin: &dyn OriginClient, idle_timeout: Duration) -> usize {
        let stale: Vec<(ContentHash, String)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, entry)| entry.last_activity.elapsed() > idle_timeout)
                .map(|(hash, entry)| (*hash, entry.title.clone()))
                .collect()
        };

        let mut evicted = 0;
        for (hash, title) in stale {
            info!("Evicting idle session {title} ({hash})");
            if let Err(e) = origin.destroy_session(hash).await {
                warn!("Destroy failed for idle session {hash}: {e}; removing entry anyway");
            }

            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(&hash) {
                if entry.last_activity.elapsed() > idle_timeout {
                    entries.remove(&hash);
                    evicted += 1;
                }
            }
        }
        evicted
    }

    #[cfg(test)]
    fn backdate(&self, hash: ContentHash, by: Duration) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&hash) {
            entry.last_activity = entry
                .last_activity
                .checked_sub(by)
                .expect("backdate before process start");
        }
    }
}

/// Spawns the periodic idle sweep as a background task.
///
/// The task runs on its own schedule, independent of request handling, and
/// exits when `shutdown` fires. Dropping the returned handle does not stop
/// the sweep; send the shutdown signal and await the handle instead.
pub fn spawn_sweep(
    registry: Arc<SessionRegistry>,
    origin: Arc<dyn OriginClient>,
    config: RegistryConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        // The first tick completes immediately; skip it so a fresh server
        // start does not sweep before anything could register.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = registry
                        .sweep_once(origin.as_ref(), config.idle_timeout)
                        .await;
                    if evicted > 0 {
                        info!("Idle sweep evicted {evicted} session(s)");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Idle sweep stopping");
                    break;
                }
            }
        }
    })
}
