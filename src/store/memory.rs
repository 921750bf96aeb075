use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{PersistedState, StateBackend};

/// In-process backend. Useful as a remote stand-in in tests, and for
/// ephemeral deployments where nothing outlives the process anyway.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    cell: RwLock<Option<PersistedState>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            cell: RwLock::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail, to simulate an unreachable backend.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn current(&self) -> Option<PersistedState> {
        self.cell.read().await.clone()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        Ok(self.cell.read().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("memory backend rejecting writes".into()));
        }
        *self.cell.write().await = Some(state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
