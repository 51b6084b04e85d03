//! Beacon collector wrapper
//!
//! Runs one telemetry collector and reports its lifecycle state. The
//! supervisor drives a [`Collector`] through start, shutdown and restart
//! without knowing whether it is a child process or an in-process fake.

pub mod fake;
pub mod process;
pub mod state;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use beacon_common::{Error, Result};

pub use fake::FakeCollector;
pub use process::{ProcessCollector, ProcessSettings};
pub use state::CollectorState;

/// A collector that reads its configuration from a file on disk
#[async_trait]
pub trait Collector: Send + Sync {
    /// Start the collector on the current config file.
    ///
    /// Returns once the collector is `Running` or has failed to get there.
    async fn run(&self) -> Result<()>;

    /// Stop the collector and wait until it is `Closed`
    async fn shutdown(&self) -> Result<()>;

    fn state(&self) -> CollectorState;
}

/// Check that a config document is a YAML mapping
pub fn validate_config(bytes: &[u8]) -> Result<()> {
    let doc: serde_yaml::Value = serde_yaml::from_slice(bytes)
        .map_err(|e| Error::invalid_input(format!("invalid collector config: {}", e)))?;
    if !doc.is_mapping() {
        return Err(Error::invalid_input(
            "invalid collector config: top level must be a mapping",
        ));
    }
    Ok(())
}

/// Run the collector, turning a panic during start into an error
pub async fn run_guarded(collector: &dyn Collector) -> Result<()> {
    match AssertUnwindSafe(collector.run()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %message, "collector panicked during start");
            Err(Error::Internal(format!("collector panicked: {}", message)))
        }
    }
}
