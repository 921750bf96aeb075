use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{PersistedState, StateBackend};

/// Local JSON file cache. Fast, but ephemeral per process instance on most
/// hosted platforms.
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
    path: PathBuf,
}

impl LocalFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path.with_file_name(format!(
            "{}.tmp.{}.{}",
            file_name,
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }
}

#[async_trait]
impl StateBackend for LocalFileBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        PersistedState::from_json(&raw).map(Some)
    }

    /// Write to a temp file in the same directory, then rename over the
    /// target so readers never observe a half-written file.
    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let json = state.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::write(&tmp, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), revision = state.revision(), "State saved locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SharedState;

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFileBackend::new(dir.path().join("state.json"));
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFileBackend::new(dir.path().join("nested/state.json"));

        let mut state = SharedState::new();
        state.global_cursor = 3;
        state.revision = 5;
        let envelope = PersistedState::new(state);

        backend.save(&envelope).await.unwrap();
        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded, envelope);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"shared_state\": 12").unwrap();

        let backend = LocalFileBackend::new(&path);
        assert!(backend.load().await.is_err());
    }
}
