//! `beacon supervisor`

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use beacon_collector::{ProcessCollector, ProcessSettings};
use beacon_common::config::SupervisorConfig;
use beacon_supervisor::Supervisor;

/// Run the supervisor until ctrl-c or a fatal error
pub async fn run(config: &SupervisorConfig) -> Result<()> {
    let collector = Arc::new(ProcessCollector::new(ProcessSettings::from_config(config)));
    let supervisor = Supervisor::from_config(config, collector).await?;
    let mut errors = supervisor
        .errors()
        .ok_or_else(|| anyhow!("supervisor error channel already taken"))?;

    let ctx = CancellationToken::new();
    let signal = ctx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        signal.cancel();
    });

    if let Err(e) = supervisor.start(&ctx).await {
        if let Err(stop) = supervisor.stop().await {
            error!(error = %stop, "supervisor stop failed");
        }
        return Err(e.into());
    }
    info!(healthy = supervisor.is_healthy(), "Supervisor started");

    let outcome = tokio::select! {
        _ = ctx.cancelled() => Ok(()),
        Some(e) = errors.recv() => {
            error!(error = %e, "supervisor failed");
            Err(anyhow::Error::from(e))
        }
    };

    if let Err(e) = supervisor.stop().await {
        error!(error = %e, "supervisor stop failed");
    }
    info!("Supervisor stopped");
    outcome
}
