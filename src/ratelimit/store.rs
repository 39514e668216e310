//! Durable storage for rate-limit counters
//!
//! State is injected into the guard through [`RateLimitStore`] so its
//! lifecycle is explicit: created at process start, read and written on
//! every guarded call.

use super::state::RateLimitState;
use crate::error::StorageError;
use crate::history::backend::validate_id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

/// Persistence for one counter per guarded resource
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Load a resource's counter; `None` if it was never written
    async fn load(&self, resource: &str) -> Result<Option<RateLimitState>, StorageError>;

    /// Persist a resource's counter
    async fn save(&self, resource: &str, state: &RateLimitState) -> Result<(), StorageError>;
}

/// Counters kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    states: RwLock<HashMap<String, RateLimitState>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn load(&self, resource: &str) -> Result<Option<RateLimitState>, StorageError> {
        Ok(self.states.read().await.get(resource).copied())
    }

    async fn save(&self, resource: &str, state: &RateLimitState) -> Result<(), StorageError> {
        self.states
            .write()
            .await
            .insert(resource.to_string(), *state);
        Ok(())
    }
}

/// One `<resource>.json` file per guarded resource, shared across restarts
pub struct FileRateLimitStore {
    dir: PathBuf,
}

impl FileRateLimitStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn state_path(&self, resource: &str) -> PathBuf {
        self.dir.join(format!("{}.json", resource))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }
}

#[async_trait]
impl RateLimitStore for FileRateLimitStore {
    async fn load(&self, resource: &str) -> Result<Option<RateLimitState>, StorageError> {
        validate_id(resource)?;
        let path = self.state_path(resource);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // An unreadable counter starts a fresh window
                warn!("Discarding unreadable rate limit state {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    async fn save(&self, resource: &str, state: &RateLimitState) -> Result<(), StorageError> {
        validate_id(resource)?;
        let json =
            serde_json::to_vec(state).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Self::write_atomic(&self.state_path(resource), &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let state = RateLimitState {
            count: 42,
            window_start: Utc::now(),
        };

        {
            let store = FileRateLimitStore::new(dir.path()).await.unwrap();
            assert!(store.load("github").await.unwrap().is_none());
            store.save("github", &state).await.unwrap();
        }

        let reopened = FileRateLimitStore::new(dir.path()).await.unwrap();
        assert_eq!(reopened.load("github").await.unwrap(), Some(state));

        let raw = std::fs::read_to_string(reopened.state_path("github")).unwrap();
        assert!(raw.contains("\"count\":42"));
        assert!(raw.contains("\"window_start\""));
    }

    #[tokio::test]
    async fn test_unreadable_state_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = FileRateLimitStore::new(dir.path()).await.unwrap();
        std::fs::write(store.state_path("github"), "garbage").unwrap();

        assert!(store.load("github").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRateLimitStore::new();
        let state = RateLimitState::fresh(Utc::now());
        store.save("api", &state).await.unwrap();
        assert_eq!(store.load("api").await.unwrap(), Some(state));
        assert!(store.load("other").await.unwrap().is_none());
    }
}
