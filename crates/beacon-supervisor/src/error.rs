//! Supervisor errors

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Collector error: {0}")]
    Collector(#[from] beacon_common::Error),

    #[error("collector stopped unexpectedly")]
    CollectorStopped,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("supervisor cancelled")]
    Cancelled,

    #[error("Stop error: {}", .0.join("; "))]
    Stop(Vec<String>),
}

impl SupervisorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SupervisorError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that end the supervisor rather than being retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::Io { .. } | SupervisorError::CollectorStopped
        )
    }
}

impl From<prost::DecodeError> for SupervisorError {
    fn from(e: prost::DecodeError) -> Self {
        SupervisorError::Protocol(format!("invalid message: {}", e))
    }
}

impl From<serde_yaml::Error> for SupervisorError {
    fn from(e: serde_yaml::Error) -> Self {
        SupervisorError::Config(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SupervisorError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SupervisorError::Session(e.to_string())
    }
}

impl From<SupervisorError> for beacon_common::Error {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Collector(inner) => inner,
            SupervisorError::Io { path, source } => beacon_common::Error::Io(std::io::Error::new(
                source.kind(),
                format!("{}: {}", path.display(), source),
            )),
            SupervisorError::Config(msg) => beacon_common::Error::Config(msg),
            SupervisorError::Cancelled => beacon_common::Error::Cancelled("supervisor cancelled".into()),
            other => beacon_common::Error::Internal(other.to_string()),
        }
    }
}
