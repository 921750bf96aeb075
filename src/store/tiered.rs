use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::{StoreConfig, DEFAULT_FLUSH_TIMEOUT};
use crate::error::StoreError;
use crate::store::{GistBackend, LocalFileBackend, PersistedState, StateBackend};

/// Two-tier store: a local cache that is always written and read first,
/// plus an optional remote tier that is written in the background and read
/// only on a cold start.
pub struct TieredStore {
    local: Arc<dyn StateBackend>,
    remote: Option<RemoteTier>,
    flush_timeout: Duration,
}

struct RemoteTier {
    backend: Arc<dyn StateBackend>,
    pending_tx: watch::Sender<Option<Arc<PersistedState>>>,
    uploaded_rx: watch::Receiver<u64>,
}

impl TieredStore {
    /// Compose a local tier with an optional remote tier.
    ///
    /// When a remote tier is given this spawns its uploader task, so it must
    /// be called from within a Tokio runtime.
    pub fn new(local: Arc<dyn StateBackend>, remote: Option<Arc<dyn StateBackend>>) -> Self {
        let remote = remote.map(|backend| {
            let (pending_tx, pending_rx) = watch::channel(None);
            let (uploaded_tx, uploaded_rx) = watch::channel(0);
            tokio::spawn(upload_loop(backend.clone(), pending_rx, uploaded_tx));
            RemoteTier {
                backend,
                pending_tx,
                uploaded_rx,
            }
        });
        Self {
            local,
            remote,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let local: Arc<dyn StateBackend> = Arc::new(LocalFileBackend::new(&config.local_path));
        let remote = config.remote.clone().map(|remote| {
            tracing::info!(resource_id = %remote.resource_id, "Remote state tier enabled");
            Arc::new(GistBackend::new(remote)) as Arc<dyn StateBackend>
        });
        if remote.is_none() {
            tracing::info!("Remote state tier not configured, running local-only");
        }
        Self::new(local, remote).with_flush_timeout(config.flush_timeout)
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[async_trait]
impl StateBackend for TieredStore {
    fn name(&self) -> &'static str {
        "tiered"
    }

    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        match self.local.load().await {
            Ok(Some(state)) => {
                tracing::info!(revision = state.revision(), "State restored from local cache");
                return Ok(Some(state));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(tier = self.local.name(), error = %e, "Local cache unreadable, falling back");
            }
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        match remote.backend.load().await {
            Ok(Some(state)) => {
                tracing::info!(revision = state.revision(), "State restored from remote tier");
                if let Err(e) = self.local.save(&state).await {
                    tracing::warn!(error = %e, "Failed to warm local cache from remote state");
                }
                Ok(Some(state))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(tier = remote.backend.name(), error = %e, "Remote tier unreadable, starting empty");
                Ok(None)
            }
        }
    }

    /// The local write must succeed. The remote write is queued and its
    /// outcome is only logged.
    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        self.local
            .save(state)
            .await
            .map_err(|e| StoreError::LocalWrite(e.to_string()))?;

        if let Some(remote) = &self.remote {
            remote.pending_tx.send_replace(Some(Arc::new(state.clone())));
        }
        Ok(())
    }

    /// Wait until the uploader has attempted the newest queued snapshot.
    async fn flush(&self) -> Result<(), StoreError> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };
        let Some(target) = remote.pending_tx.borrow().as_ref().map(|s| s.revision()) else {
            return Ok(());
        };

        let mut uploaded = remote.uploaded_rx.clone();
        let waited = tokio::time::timeout(self.flush_timeout, uploaded.wait_for(|r| *r >= target))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StoreError::Remote("remote uploader stopped".into())),
            Err(_) => Err(StoreError::Remote(format!(
                "timed out waiting for remote write of revision {}",
                target
            ))),
        }
    }
}

/// Uploads the newest pending snapshot whenever one is queued. Snapshots
/// queued while an upload is in flight collapse into the latest one.
async fn upload_loop(
    backend: Arc<dyn StateBackend>,
    mut pending_rx: watch::Receiver<Option<Arc<PersistedState>>>,
    uploaded_tx: watch::Sender<u64>,
) {
    while pending_rx.changed().await.is_ok() {
        let Some(snapshot) = pending_rx.borrow_and_update().clone() else {
            continue;
        };
        let revision = snapshot.revision();
        if let Err(e) = backend.save(&snapshot).await {
            tracing::warn!(
                tier = backend.name(),
                revision,
                error = %e,
                "Remote write failed, durability is local-only until the next save"
            );
        }
        uploaded_tx.send_replace(revision);
    }
    tracing::debug!("Remote uploader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SharedState;
    use crate::store::MemoryBackend;

    fn envelope(revision: u64) -> PersistedState {
        let mut state = SharedState::new();
        state.revision = revision;
        state.global_cursor = revision as usize;
        PersistedState::new(state)
    }

    #[tokio::test]
    async fn local_only_round_trip() {
        let local = Arc::new(MemoryBackend::new());
        let store = TieredStore::new(local.clone(), None);
        assert!(!store.has_remote());

        store.save(&envelope(1)).await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().revision(), 1);
    }

    #[tokio::test]
    async fn local_failure_is_fatal() {
        let local = Arc::new(MemoryBackend::new());
        local.set_fail_writes(true);
        let remote = Arc::new(MemoryBackend::new());
        let store = TieredStore::new(local, Some(remote.clone()));

        let err = store.save(&envelope(1)).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn remote_failure_is_swallowed() {
        let local = Arc::new(MemoryBackend::new());
        let remote = Arc::new(MemoryBackend::new());
        remote.set_fail_writes(true);
        let store = TieredStore::new(local.clone(), Some(remote.clone()));

        store.save(&envelope(3)).await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(local.current().await.unwrap().revision(), 3);
        assert!(remote.current().await.is_none());
    }

    #[tokio::test]
    async fn flush_waits_for_remote_upload() {
        let local = Arc::new(MemoryBackend::new());
        let remote = Arc::new(MemoryBackend::new());
        let store = TieredStore::new(local, Some(remote.clone()));

        for rev in 1..=5 {
            store.save(&envelope(rev)).await.unwrap();
        }
        store.flush().await.unwrap();
        assert_eq!(remote.current().await.unwrap().revision(), 5);
    }

    struct SlowBackend(Duration);

    #[async_trait]
    impl StateBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
            Ok(None)
        }

        async fn save(&self, _state: &PersistedState) -> Result<(), StoreError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_gives_up_after_timeout() {
        let store = TieredStore::new(
            Arc::new(MemoryBackend::new()),
            Some(Arc::new(SlowBackend(Duration::from_secs(5)))),
        )
        .with_flush_timeout(Duration::from_millis(50));

        store.save(&envelope(2)).await.unwrap();
        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::Remote(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn cold_start_reads_remote_and_warms_local() {
        let remote = Arc::new(MemoryBackend::with_state(envelope(7)));
        let local = Arc::new(MemoryBackend::new());
        let store = TieredStore::new(local.clone(), Some(remote));

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.revision(), 7);
        assert_eq!(local.current().await.unwrap().revision(), 7);
    }

    #[tokio::test]
    async fn local_cache_wins_over_remote() {
        let remote = Arc::new(MemoryBackend::with_state(envelope(2)));
        let local = Arc::new(MemoryBackend::with_state(envelope(9)));
        let store = TieredStore::new(local, Some(remote));

        assert_eq!(store.load().await.unwrap().unwrap().revision(), 9);
    }

    #[tokio::test]
    async fn corrupt_local_falls_back_to_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json at all").unwrap();

        let remote = Arc::new(MemoryBackend::with_state(envelope(4)));
        let store = TieredStore::new(Arc::new(LocalFileBackend::new(&path)), Some(remote));

        assert_eq!(store.load().await.unwrap().unwrap().revision(), 4);
        // local cache was rewritten with the remote copy
        let local = LocalFileBackend::new(&path);
        assert_eq!(local.load().await.unwrap().unwrap().revision(), 4);
    }

    #[tokio::test]
    async fn nothing_anywhere_loads_empty() {
        let store = TieredStore::new(
            Arc::new(MemoryBackend::new()),
            Some(Arc::new(MemoryBackend::new())),
        );
        assert!(store.load().await.unwrap().is_none());
    }
}
