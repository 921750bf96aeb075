use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::catalog::ItemCatalog;
use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::store::{StateBackend, TieredStore};

/// Process-level wiring: catalog, tiered store, coordinator and HTTP API.
pub struct Server {
    pub config: ServerConfig,
    pub coordinator: Arc<Coordinator>,
}

impl Server {
    /// Load the catalog and restore state.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be loaded. State recovery never fails;
    /// an unrecoverable store yields fresh state.
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let catalog = Arc::new(ItemCatalog::load(&config.catalog_path)?);
        if catalog.is_empty() {
            tracing::warn!(
                path = %config.catalog_path.display(),
                "Catalog has no items, every session will see the queue as finished"
            );
        }
        let store: Arc<dyn StateBackend> = Arc::new(TieredStore::from_config(&config.store));
        let coordinator =
            Coordinator::open(catalog, store, config.coordinator.clone()).await;

        Ok(Self {
            config,
            coordinator: Arc::new(coordinator),
        })
    }

    /// Serve until `shutdown` fires, then flush state once more.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        let state = ApiState {
            coordinator: self.coordinator.clone(),
        };
        let served = run_api(self.config.listen_addr, state, shutdown).await;

        match self.coordinator.flush().await {
            Ok(()) => tracing::info!("Final state flush complete"),
            Err(e) => tracing::warn!(error = %e, "Final state flush failed"),
        }

        served?;
        Ok(())
    }
}
