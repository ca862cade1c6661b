use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::error;

use crate::error::RaftError;
use crate::log::LogEntry;

/// The durable subset of peer state, encoded as a single blob. Every
/// mutation of any field rewrites the whole tuple before the change becomes
/// externally visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<usize>,
    pub entries: Vec<LogEntry>,
}

impl HardState {
    pub fn encode(&self) -> Result<Vec<u8>, RaftError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, RaftError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Stable storage for the durable blob. `save_state` replaces the stored
/// blob atomically; `read_state` returns the last saved blob or empty.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn save_state(&self, data: Vec<u8>);
    async fn read_state(&self) -> Vec<u8>;
}

/// In-process persister. Survives a simulated crash as long as the same
/// instance is handed to the restarted peer.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    state: Mutex<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn save_state(&self, data: Vec<u8>) {
        *self.state.lock().await = data;
    }

    async fn read_state(&self) -> Vec<u8> {
        self.state.lock().await.clone()
    }
}

/// File-backed persister. Writes go to a sibling temporary file which is
/// then renamed over the target, so a crash mid-write never leaves a
/// partial blob observable.
#[derive(Debug)]
pub struct FilePersister {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_path = path.clone();
        tmp_path.set_extension("tmp");
        Ok(FilePersister { path, tmp_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Persister for FilePersister {
    async fn save_state(&self, data: Vec<u8>) {
        let result = match tokio::fs::write(&self.tmp_path, &data).await {
            Ok(()) => tokio::fs::rename(&self.tmp_path, &self.path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            error!(
                "failed to persist state to {}: {}",
                self.path.display(),
                err
            );
        }
    }

    async fn read_state(&self) -> Vec<u8> {
        tokio::fs::read(&self.path).await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_state() -> HardState {
        HardState {
            current_term: 7,
            voted_for: Some(2),
            entries: vec![
                LogEntry::new(0, Bytes::new()),
                LogEntry::new(3, Bytes::from_static(b"set x=1")),
                LogEntry::new(7, Bytes::from_static(b"set y=2")),
            ],
        }
    }

    #[test]
    fn hard_state_round_trips() {
        let state = sample_state();
        let blob = state.encode().unwrap();
        let decoded = HardState::decode(&blob).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn garbage_blob_fails_to_decode() {
        assert!(HardState::decode(b"definitely not bincode").is_err());
    }

    #[tokio::test]
    async fn memory_persister_replaces_blob() {
        let p = MemoryPersister::new();
        assert!(p.read_state().await.is_empty());
        p.save_state(vec![1, 2, 3]).await;
        p.save_state(vec![4, 5]).await;
        assert_eq!(p.read_state().await, vec![4, 5]);
    }

    #[tokio::test]
    async fn file_persister_round_trips() {
        let dir = std::env::temp_dir().join("raftcore-persist-test");
        let _ = fs::remove_dir_all(&dir);
        let p = FilePersister::new(dir.join("state.bin")).unwrap();
        assert!(p.read_state().await.is_empty());

        let blob = sample_state().encode().unwrap();
        p.save_state(blob.clone()).await;
        assert_eq!(p.read_state().await, blob);

        // a fresh instance over the same path sees the saved blob
        let reopened = FilePersister::new(dir.join("state.bin")).unwrap();
        assert_eq!(reopened.read_state().await, blob);
        let _ = fs::remove_dir_all(&dir);
    }
}
