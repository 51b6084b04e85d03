//! Beacon OpAMP supervisor
//!
//! Keeps one collector running on the configuration a remote control
//! server asks for. Each remote config is written to disk with a rollback
//! shadow, the collector is restarted on it, and the outcome is reported
//! back as `Applied` or `Failed`. Without a server endpoint the local
//! config is run as-is.

pub mod backoff;
pub mod config_doc;
pub mod description;
pub mod error;
pub mod manager_config;
pub mod opamp;
pub mod supervisor;
pub mod transport;

pub use config_doc::{config_hash, ConfigDoc};
pub use error::{Result, SupervisorError};
pub use manager_config::ManagerConfig;
pub use supervisor::{ApplyOutcome, Supervisor, SupervisorSettings, COLLECTOR_CONFIG_KEY};
pub use transport::{Link, MemoryServer, MemoryTransport, ServerConn, Transport, WsTransport};
