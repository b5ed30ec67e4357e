//! Run persistence.
//!
//! The dispatcher checkpoints the whole run after every outcome. A failed
//! checkpoint is fatal to the process: continuing would diverge from the
//! last durable snapshot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::run::Run;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("checkpoint corrupted: {0}")]
    Corrupted(String),
    #[error("serializer does not support loading")]
    Unsupported,
}

/// Persists a run and loads it back.
#[async_trait]
pub trait Serializer<OC, JC>: Send + Sync {
    async fn serialize(&self, run: &Run<OC, JC>) -> Result<(), CheckpointError>;
    async fn deserialize(&self) -> Result<Run<OC, JC>, CheckpointError>;
}

/// Discards every checkpoint. The engine default when no serializer is
/// supplied.
pub struct NoopSerializer;

#[async_trait]
impl<OC, JC> Serializer<OC, JC> for NoopSerializer
where
    OC: Send + Sync,
    JC: Send + Sync,
{
    async fn serialize(&self, _run: &Run<OC, JC>) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn deserialize(&self) -> Result<Run<OC, JC>, CheckpointError> {
        Err(CheckpointError::Unsupported)
    }
}

/// Writes the run as one JSON document at a fixed path.
pub struct JsonSerializer {
    path: PathBuf,
}

impl JsonSerializer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl<OC, JC> Serializer<OC, JC> for JsonSerializer
where
    OC: Serialize + DeserializeOwned + Send + Sync,
    JC: Serialize + DeserializeOwned + Send + Sync,
{
    async fn serialize(&self, run: &Run<OC, JC>) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec(run)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))
    }

    async fn deserialize(&self) -> Result<Run<OC, JC>, CheckpointError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupted(e.to_string()))
    }
}
