//! End-to-end exercise of the session registry sweep task.
//!
//! Uses short real-time intervals and a counting mock origin to verify that
//! abandoned sessions are destroyed and removed while active ones survive.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use slipstream_core::config::RegistryConfig;
use slipstream_core::locator::ContentHash;
use slipstream_core::origin::{
    OriginClient, OriginError, OriginHealth, OriginSession, PlayableItem, SessionStatus,
};
use slipstream_core::session::{SessionRegistry, spawn_sweep};
use tokio::sync::watch;

#[derive(Default)]
struct CountingOrigin {
    destroys: AtomicUsize,
    fail_destroy: bool,
}

#[async_trait]
impl OriginClient for CountingOrigin {
    async fn create_session(
        &self,
        _locator: &str,
        _title: Option<&str>,
    ) -> Result<OriginSession, OriginError> {
        unimplemented!("not used by sweep tests")
    }

    async fn session_status(
        &self,
        _hash: ContentHash,
    ) -> Result<Option<SessionStatus>, OriginError> {
        Ok(None)
    }

    async fn list_items(&self, _hash: ContentHash) -> Result<Vec<PlayableItem>, OriginError> {
        Ok(Vec::new())
    }

    async fn destroy_session(&self, _hash: ContentHash) -> Result<(), OriginError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy {
            Err(OriginError::Unavailable {
                reason: "origin offline".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn health(&self) -> OriginHealth {
        OriginHealth::offline("mock")
    }

    fn stream_url(&self, _path: &str, _query: &str) -> String {
        String::new()
    }
}

fn fast_config() -> RegistryConfig {
    RegistryConfig {
        sweep_interval: Duration::from_millis(25),
        idle_timeout: Duration::from_millis(150),
    }
}

#[tokio::test]
async fn sweep_task_evicts_abandoned_sessions() {
    let registry = Arc::new(SessionRegistry::new());
    let origin = Arc::new(CountingOrigin::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = spawn_sweep(
        registry.clone(),
        origin.clone() as Arc<dyn OriginClient>,
        fast_config(),
        shutdown_rx,
    );

    registry.touch(ContentHash::new([1; 20]), Some("abandoned"));
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(registry.is_empty());
    assert!(origin.destroys.load(Ordering::SeqCst) >= 1);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn sweep_task_spares_sessions_being_watched() {
    let registry = Arc::new(SessionRegistry::new());
    let origin = Arc::new(CountingOrigin::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = spawn_sweep(
        registry.clone(),
        origin.clone() as Arc<dyn OriginClient>,
        fast_config(),
        shutdown_rx,
    );

    let watched = ContentHash::new([2; 20]);
    registry.touch(watched, Some("playing"));

    // Simulate playback traffic refreshing the session's activity.
    for _ in 0..12 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        registry.touch(watched, None);
    }

    assert_eq!(registry.len(), 1);
    assert_eq!(origin.destroys.load(Ordering::SeqCst), 0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn eviction_survives_failing_origin() {
    let registry = Arc::new(SessionRegistry::new());
    let origin = Arc::new(CountingOrigin {
        destroys: AtomicUsize::new(0),
        fail_destroy: true,
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = spawn_sweep(
        registry.clone(),
        origin.clone() as Arc<dyn OriginClient>,
        fast_config(),
        shutdown_rx,
    );

    registry.touch(ContentHash::new([3; 20]), Some("doomed"));
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The registry entry must not get stuck behind a dead origin.
    assert!(registry.is_empty());
    assert!(origin.destroys.load(Ordering::SeqCst) >= 1);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
