//! Durable storage for the coordinator's shared state.
//!
//! Every backend moves one opaque snapshot, the [`PersistedState`] envelope,
//! and knows nothing about assignment semantics.
//!
//! # Backends
//!
//! - [`LocalFileBackend`]: JSON file on local disk, written atomically
//! - [`MemoryBackend`]: in-process cell, for tests and ephemeral runs
//! - [`GistBackend`]: authenticated remote document store
//! - [`TieredStore`]: composes a local tier and an optional remote tier
//!
//! # Tiering
//!
//! Loads prefer the local cache and fall back to the remote tier on a cold
//! start. Saves always write the local cache and then hand the snapshot to
//! the remote tier in the background. A remote failure downgrades
//! durability to local-only instead of failing the caller.

pub mod gist;
pub mod local;
pub mod memory;
pub mod tiered;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::SharedState;
use crate::error::StoreError;

pub use gist::GistBackend;
pub use local::LocalFileBackend;
pub use memory::MemoryBackend;
pub use tiered::TieredStore;

/// Schema version written into every envelope.
pub const STATE_FORMAT_VERSION: &str = "1.0";

/// Wire envelope around a state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub shared_state: SharedState,
    pub version: String,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn new(shared_state: SharedState) -> Self {
        Self {
            shared_state,
            version: STATE_FORMAT_VERSION.to_string(),
            saved_at: Utc::now(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.shared_state.revision
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse an envelope, rejecting schema versions this build cannot read.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let parsed: Self = serde_json::from_str(raw)?;
        let major = parsed.version.split('.').next().unwrap_or("");
        let supported = STATE_FORMAT_VERSION.split('.').next().unwrap_or("");
        if major != supported {
            return Err(StoreError::UnsupportedVersion(parsed.version));
        }
        Ok(parsed)
    }
}

/// One storage strategy. Implemented by each tier and by the tiering
/// decorator itself.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Latest stored snapshot, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<PersistedState>, StoreError>;

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;

    /// Wait until any deferred writes have been attempted.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let mut state = SharedState::new();
        state.global_cursor = 4;
        state.revision = 9;
        let envelope = PersistedState::new(state);

        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"version\": \"1.0\""));
        let back = PersistedState::from_json(&json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.revision(), 9);
    }

    #[test]
    fn envelope_without_saved_at_is_accepted() {
        let raw = serde_json::json!({
            "shared_state": SharedState::new(),
            "version": "1.0",
        })
        .to_string();
        let parsed = PersistedState::from_json(&raw).unwrap();
        assert_eq!(parsed.shared_state, SharedState::new());
    }

    #[test]
    fn unknown_major_version_is_rejected() {
        let mut envelope = PersistedState::new(SharedState::new());
        envelope.version = "2.0".to_string();
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(matches!(
            PersistedState::from_json(&json),
            Err(StoreError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            PersistedState::from_json("{not json"),
            Err(StoreError::Serialization(_))
        ));
    }
}
