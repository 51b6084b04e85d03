//! Configuration loading

use anyhow::Result;
use beacon_common::config::Config;

/// Load configuration from file, falling back to defaults when it is absent
pub async fn load(path: &str) -> Result<Config> {
    Config::load(path).await.map_err(|e| anyhow::anyhow!(e))
}

/// Apply command line overrides on top of the file
pub fn apply_overrides(config: &mut Config, port: Option<u16>) {
    if let Some(port) = port {
        config.server.port = port;
    }
}
