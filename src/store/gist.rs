use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::RemoteConfig;
use crate::error::StoreError;
use crate::store::{PersistedState, StateBackend};

#[derive(Debug, Deserialize)]
struct GistDocument {
    #[serde(default)]
    files: HashMap<String, Option<GistFile>>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

/// Remote durable tier backed by a Gist-style document API.
///
/// - `GET  {api}/gists/{id}` returns `{"files": {name: {"content": ..}}}`
/// - `PATCH {api}/gists/{id}` with the same shape replaces one file
///
/// Every request carries `Authorization: Bearer {token}`.
pub struct GistBackend {
    config: RemoteConfig,
    http_client: reqwest::Client,
}

impl GistBackend {
    pub fn new(config: RemoteConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("review-queue/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http_client,
        }
    }

    fn resource_url(&self) -> String {
        format!("{}/gists/{}", self.config.api_base, self.config.resource_id)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn fetch_raw(&self, raw_url: &str) -> Result<String, StoreError> {
        let response = self.authorized(self.http_client.get(raw_url)).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Remote(format!(
                "raw content fetch returned {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl StateBackend for GistBackend {
    fn name(&self) -> &'static str {
        "gist"
    }

    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let response = self
            .authorized(self.http_client.get(self.resource_url()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Remote(format!(
                "GET {} returned {}",
                self.resource_url(),
                response.status()
            )));
        }

        let document: GistDocument = response.json().await?;
        let Some(Some(file)) = document.files.get(&self.config.file_name) else {
            return Ok(None);
        };

        let content = match (&file.content, file.truncated, &file.raw_url) {
            (_, true, Some(raw_url)) => self.fetch_raw(raw_url).await?,
            (Some(content), _, _) => content.clone(),
            (None, _, _) => return Ok(None),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let state = PersistedState::from_json(&content)?;
        tracing::debug!(revision = state.revision(), "State loaded from remote");
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let mut files = serde_json::Map::new();
        files.insert(
            self.config.file_name.clone(),
            json!({ "content": state.to_json()? }),
        );
        let body = json!({ "files": files });
        let response = self
            .authorized(self.http_client.patch(self.resource_url()))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Remote(format!(
                "PATCH {} returned {}",
                self.resource_url(),
                response.status()
            )));
        }
        tracing::debug!(revision = state.revision(), "State saved to remote");
        Ok(())
    }
}
