//! Beacon
//!
//! Single binary that provides:
//! - Streamed raw telemetry export (CSV / JSONL)
//! - Expression-based notification routing
//! - OpAMP supervision of an OpenTelemetry collector

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon_common::config::LoggingConfig;

mod agent;
mod config;
mod server;

use server::BeaconServer;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(author, version, about = "Beacon - telemetry export and collector supervision", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "/etc/beacon/beacon.toml", env = "BEACON_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Server {
        /// Override `server.port`
        #[arg(short, long, env = "BEACON_PORT")]
        port: Option<u16>,
    },

    /// Supervise an OpenTelemetry collector
    Supervisor,

    /// Show version information
    Version,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("beacon={}", logging.level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("Beacon version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let found = Path::new(&cli.config).exists();
    let mut config = config::load(&cli.config).await?;
    init_logging(&config.logging)?;
    if !found {
        warn!(path = %cli.config, "config file not found, using defaults");
    }

    match cli.command {
        Commands::Server { port } => {
            config::apply_overrides(&mut config, port);
            info!("Starting Beacon server...");

            let server = BeaconServer::new(config)?;
            let shutdown = server.shutdown_token();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
                shutdown.cancel();
            });

            server.run().await?;
        }

        Commands::Supervisor => {
            info!("Starting Beacon supervisor...");
            agent::run(&config.supervisor).await?;
        }

        Commands::Version => {}
    }

    Ok(())
}
