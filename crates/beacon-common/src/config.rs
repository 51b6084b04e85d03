//! Configuration management for Beacon

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure for Beacon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Raw data export configuration
    #[serde(default)]
    pub export: ExportConfig,

    /// Notification routing configuration
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Collector supervisor configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML or JSON file.
    ///
    /// A missing file yields the defaults.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.as_ref().display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::Config(format!("Failed to read config file: {}", e))),
        };

        Self::parse(path.as_ref(), &content)
    }

    /// Parse configuration text, picking the format from the file extension
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let config: Config = if path.extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would break the export invariants
    pub fn validate(&self) -> Result<()> {
        let export = &self.export;
        if export.default_limit == 0 || export.default_limit > export.max_limit {
            return Err(Error::Config(format!(
                "export.default_limit must be in 1..={}",
                export.max_limit
            )));
        }
        if export.chunk_size == 0 {
            return Err(Error::Config("export.chunk_size must be positive".into()));
        }
        if export.channel_capacity == 0 {
            return Err(Error::Config("export.channel_capacity must be positive".into()));
        }
        if self.supervisor.watchdog_interval_ms == 0 {
            return Err(Error::Config(
                "supervisor.watchdog_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require a bearer token on API calls
    pub auth_enabled: bool,
    /// HMAC secret for JWT validation
    pub jwt_secret: String,
    /// Expected token issuer
    pub jwt_issuer: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_issuer: "beacon".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Row limit applied when the request does not set one
    pub default_limit: usize,
    /// Largest row limit a request may ask for
    pub max_limit: usize,
    /// Rows fetched from the store per page
    pub chunk_size: usize,
    /// Byte cap for one export body
    pub max_bytes: u64,
    /// Deadline for a single store call
    pub query_timeout_secs: u64,
    /// Thread hint attached to store queries
    pub max_threads: usize,
    /// Row channel capacity between producer and writer
    pub channel_capacity: usize,
}

impl ExportConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_limit: 10_000,
            max_limit: 50_000,
            chunk_size: 5_000,
            max_bytes: 1024 * 1024 * 1024, // 1GB
            query_timeout_secs: 600,
            max_threads: 2,
            channel_capacity: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Log expression compile failures (once per expression)
    pub log_expression_errors: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            log_expression_errors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Agent manager config (server endpoint, agent id), YAML
    pub manager_config_path: String,
    /// Collector config document, YAML
    pub collector_config_path: String,
    /// Collector executable
    pub collector_binary: String,
    /// Extra arguments passed before `--config <path>`
    pub collector_args: Vec<String>,
    /// Collector state poll interval
    pub watchdog_interval_ms: u64,
    /// A collector that exits within this window failed to start
    pub startup_grace_ms: u64,
    /// Time allowed for a graceful collector shutdown
    pub shutdown_timeout_secs: u64,
    /// First reconnect delay
    pub backoff_initial_ms: u64,
    /// Reconnect delay ceiling
    pub backoff_max_ms: u64,
    /// Reported as `service.version`
    pub service_version: String,
    /// Extra capability names, reported as `capabilities.<name>`
    pub capabilities: Vec<String>,
}

impl SupervisorConfig {
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    #[must_use]
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            manager_config_path: "/etc/beacon/manager.yaml".to_string(),
            collector_config_path: "/etc/beacon/collector.yaml".to_string(),
            collector_binary: "otelcol".to_string(),
            collector_args: Vec::new(),
            watchdog_interval_ms: 200,
            startup_grace_ms: 1_000,
            shutdown_timeout_secs: 10,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive for the `beacon` targets
    pub level: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
