//! Shared handler state

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use beacon_common::Config;
use beacon_export::Exporter;
use beacon_routing::RouteService;
use beacon_store::TelemetryStore;

use crate::auth::JwtAuth;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub exporter: Exporter,
    pub routes: Arc<RouteService>,
    pub auth: Arc<JwtAuth>,
    /// Cancelled on server shutdown; running exports stop with it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn TelemetryStore>, routes: Arc<RouteService>) -> Self {
        let exporter = Exporter::new(store, config.export.clone());
        let auth = Arc::new(JwtAuth::from_config(&config.security));
        Self {
            config: Arc::new(config),
            exporter,
            routes,
            auth,
            shutdown: CancellationToken::new(),
        }
    }
}
