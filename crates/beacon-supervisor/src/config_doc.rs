//! The collector config document on disk

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SupervisorError};

const INSTANCE_ID_PATH: [&str; 4] = ["service", "telemetry", "resource", "service.instance.id"];

/// SHA-256 of a config body
pub fn config_hash(body: &[u8]) -> Vec<u8> {
    Sha256::digest(body).to_vec()
}

/// Collector config file plus the hash of what the collector runs.
///
/// Only the apply routine writes the file; it holds the document behind
/// the apply lock while doing so.
#[derive(Debug)]
pub struct ConfigDoc {
    path: PathBuf,
    current_hash: Vec<u8>,
}

impl ConfigDoc {
    /// Read the document and hash its current contents
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = read(&path).await?;
        Ok(Self {
            current_hash: config_hash(&bytes),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_hash(&self) -> &[u8] {
        &self.current_hash
    }

    pub fn set_current_hash(&mut self, hash: Vec<u8>) {
        self.current_hash = hash;
    }

    pub fn rollback_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".rollback");
        PathBuf::from(name)
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        read(&self.path).await
    }

    /// Replace the file contents without readers seeing a partial write
    pub async fn write(&self, body: &[u8]) -> Result<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| SupervisorError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SupervisorError::io(&self.path, e))?;
        debug!(path = %self.path.display(), bytes = body.len(), "collector config written");
        Ok(())
    }

    /// Copy the current file to the rollback shadow
    pub async fn backup(&self) -> Result<()> {
        let rollback = self.rollback_path();
        tokio::fs::copy(&self.path, &rollback)
            .await
            .map_err(|e| SupervisorError::io(&rollback, e))?;
        Ok(())
    }

    /// Put the rollback shadow back in place
    pub async fn restore(&self) -> Result<()> {
        let rollback = self.rollback_path();
        let bytes = read(&rollback).await?;
        self.write(&bytes).await?;
        info!(path = %self.path.display(), "collector config restored from rollback");
        Ok(())
    }

    pub async fn remove_backup(&self) -> Result<()> {
        let rollback = self.rollback_path();
        match tokio::fs::remove_file(&rollback).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SupervisorError::io(&rollback, e)),
        }
    }

    /// Make sure the document carries a service instance id.
    ///
    /// Generates one and rewrites the file when it is missing. Returns
    /// the id in effect.
    pub async fn ensure_instance_id(path: &Path) -> Result<String> {
        let bytes = read(path).await?;
        let mut doc: serde_yaml::Value = if bytes.iter().all(u8::is_ascii_whitespace) {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            serde_yaml::from_slice(&bytes)?
        };

        if let Some(id) = instance_id(&doc) {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        set_instance_id(&mut doc, &id)?;
        let text = serde_yaml::to_string(&doc)?;
        tokio::fs::write(path, text)
            .await
            .map_err(|e| SupervisorError::io(path, e))?;
        info!(path = %path.display(), instance_id = %id, "injected service instance id");
        Ok(id)
    }
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SupervisorError::io(path, e))
}

fn instance_id(doc: &serde_yaml::Value) -> Option<String> {
    let mut node = doc;
    for key in INSTANCE_ID_PATH {
        node = node.get(key)?;
    }
    match node {
        serde_yaml::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn set_instance_id(doc: &mut serde_yaml::Value, id: &str) -> Result<()> {
    let mut node = doc;
    let (last, parents) = INSTANCE_ID_PATH
        .split_last()
        .ok_or_else(|| SupervisorError::Config("empty instance id path".into()))?;
    for key in parents {
        let map = node.as_mapping_mut().ok_or_else(|| {
            SupervisorError::Config(format!("collector config: '{}' is not a mapping", key))
        })?;
        let key = serde_yaml::Value::String((*key).to_string());
        if map.get(&key).map_or(true, serde_yaml::Value::is_null) {
            map.insert(key.clone(), serde_yaml::Value::Mapping(Default::default()));
        }
        node = map
            .get_mut(&key)
            .ok_or_else(|| SupervisorError::Config("collector config: missing section".into()))?;
    }
    let map = node.as_mapping_mut().ok_or_else(|| {
        SupervisorError::Config("collector config: resource is not a mapping".into())
    })?;
    map.insert(
        serde_yaml::Value::String((*last).to_string()),
        serde_yaml::Value::String(id.to_string()),
    );
    Ok(())
}
