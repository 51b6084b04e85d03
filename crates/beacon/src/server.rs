//! Server orchestration

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use beacon_api::AppState;
use beacon_common::config::Config;
use beacon_common::metrics;
use beacon_routing::{MemoryRouteStore, NoopAlertmanager, RouteService};
use beacon_store::MemoryStore;

/// The API server and the components behind it
pub struct BeaconServer {
    state: AppState,
}

impl BeaconServer {
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing Beacon components...");

        metrics::install_prometheus()?;

        let store = Arc::new(MemoryStore::new());
        let routes = Arc::new(RouteService::new(
            Arc::new(MemoryRouteStore::new()),
            Arc::new(NoopAlertmanager),
            config.routing.log_expression_errors,
        ));

        if !config.security.auth_enabled {
            info!("Authentication disabled; requests must name org_id");
        }

        let state = AppState::new(config, store, routes);
        info!("Beacon initialization complete");
        Ok(Self { state })
    }

    /// Cancelling the token stops the listener and any running exports
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Serve until shut down
    pub async fn run(&self) -> Result<()> {
        beacon_api::serve(self.state.clone()).await?;
        info!("Beacon server stopped");
        Ok(())
    }
}
