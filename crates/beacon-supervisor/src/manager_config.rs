//! Agent manager config: where the control server is and who we are

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SupervisorError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// OpAMP WebSocket endpoint; unset means run the local config only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_endpoint: Option<String>,
    /// Agent instance id, generated on first load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Bearer token sent when opening the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl ManagerConfig {
    /// Load the config, generating and persisting an id when it has none.
    ///
    /// A missing file is treated as an empty config.
    pub async fn load_or_init(path: &Path) -> Result<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => ManagerConfig::default(),
            Ok(text) => serde_yaml::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ManagerConfig::default(),
            Err(e) => return Err(SupervisorError::io(path, e)),
        };

        let id_is_valid = config
            .id
            .as_deref()
            .map_or(false, |id| Uuid::parse_str(id).is_ok());
        if !id_is_valid {
            let id = Uuid::new_v4().to_string();
            info!(agent_id = %id, path = %path.display(), "generated agent id");
            config.id = Some(id);
            let text = serde_yaml::to_string(&config)?;
            tokio::fs::write(path, text)
                .await
                .map_err(|e| SupervisorError::io(path, e))?;
        }
        Ok(config)
    }

    pub fn server_endpoint(&self) -> Option<&str> {
        self.server_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The agent id as the 16 raw bytes sent on the wire
    pub fn instance_uid(&self) -> Vec<u8> {
        self.id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(|uuid| uuid.as_bytes().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_generates_and_persists_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.yaml");
        tokio::fs::write(&path, "server_endpoint: ws://localhost:4320/v1/opamp\n")
            .await
            .unwrap();

        let config = ManagerConfig::load_or_init(&path).await.unwrap();
        let id = config.id.clone().unwrap();
        assert_eq!(config.server_endpoint(), Some("ws://localhost:4320/v1/opamp"));
        assert_eq!(config.instance_uid().len(), 16);

        let again = ManagerConfig::load_or_init(&path).await.unwrap();
        assert_eq!(again.id.as_deref(), Some(id.as_str()));
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains(&id));
    }

    #[tokio::test]
    async fn test_missing_file_means_no_server() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.yaml");
        let config = ManagerConfig::load_or_init(&path).await.unwrap();
        assert_eq!(config.server_endpoint(), None);
        assert!(config.id.is_some());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.yaml");
        tokio::fs::write(&path, "server_endpoint: [").await.unwrap();
        assert!(matches!(
            ManagerConfig::load_or_init(&path).await,
            Err(SupervisorError::Config(_))
        ));
    }
}
