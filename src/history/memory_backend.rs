//! In-memory history backend for tests and ephemeral sessions

use super::backend::{validate_id, ArtifactInfo, ArtifactKind, HistoryBackend, StorageError};
use crate::context::Message;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, (Vec<Message>, DateTime<Utc>)>,
    archives: HashMap<String, (String, DateTime<Utc>)>,
    last_modified: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing modification stamp, so eviction order is stable
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_modified {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_modified = Some(stamp);
        stamp
    }
}

/// History kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryHistoryBackend {
    inner: RwLock<Inner>,
}

impl InMemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session with an explicit modification time
    pub async fn insert_session_at(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        modified: DateTime<Utc>,
    ) {
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .insert(session_id.to_string(), (messages, modified));
    }

    /// Seed an archive with an explicit modification time
    pub async fn insert_archive_at(&self, archive_id: &str, transcript: &str, modified: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        inner
            .archives
            .insert(archive_id.to_string(), (transcript.to_string(), modified));
    }

    /// Read back an archive transcript
    pub async fn archive(&self, archive_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.archives.get(archive_id).map(|(text, _)| text.clone())
    }

    /// Number of stored artifacts, live and archived
    pub async fn artifact_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.sessions.len() + inner.archives.len()
    }
}

#[async_trait]
impl HistoryBackend for InMemoryHistoryBackend {
    async fn exists(&self, session_id: &str) -> Result<bool, StorageError> {
        validate_id(session_id)?;
        Ok(self.inner.read().await.sessions.contains_key(session_id))
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        validate_id(session_id)?;
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(session_id)
            .map(|(messages, _)| messages.clone())
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        validate_id(session_id)?;
        let mut inner = self.inner.write().await;
        let stamp = inner.tick();
        let entry = inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| (Vec::new(), stamp));
        entry.0.push(message.clone());
        entry.1 = stamp;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StorageError> {
        validate_id(session_id)?;
        let mut inner = self.inner.write().await;
        let stamp = inner.tick();
        inner
            .sessions
            .insert(session_id.to_string(), (Vec::new(), stamp));
        Ok(())
    }

    async fn write_archive(&self, archive_id: &str, transcript: &str) -> Result<(), StorageError> {
        validate_id(archive_id)?;
        let mut inner = self.inner.write().await;
        let stamp = inner.tick();
        inner
            .archives
            .insert(archive_id.to_string(), (transcript.to_string(), stamp));
        Ok(())
    }

    async fn list_with_mod_times(&self) -> Result<Vec<ArtifactInfo>, StorageError> {
        let inner = self.inner.read().await;
        let sessions = inner.sessions.iter().map(|(id, (_, modified))| ArtifactInfo {
            id: id.clone(),
            kind: ArtifactKind::Session,
            modified: *modified,
        });
        let archives = inner.archives.iter().map(|(id, (_, modified))| ArtifactInfo {
            id: id.clone(),
            kind: ArtifactKind::Archive,
            modified: *modified,
        });
        Ok(sessions.chain(archives).collect())
    }

    async fn delete(&self, artifact: &ArtifactInfo) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let removed = match artifact.kind {
            ArtifactKind::Session => inner.sessions.remove(&artifact.id).is_some(),
            ArtifactKind::Archive => inner.archives.remove(&artifact.id).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(StorageError::io(
                &artifact.id,
                std::io::Error::new(std::io::ErrorKind::NotFound, "artifact not found"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_get_increasing_mod_times() {
        let backend = InMemoryHistoryBackend::new();
        backend.clear("a").await.unwrap();
        backend.clear("b").await.unwrap();
        backend.write_archive("c", "text").await.unwrap();

        let mut artifacts = backend.list_with_mod_times().await.unwrap();
        artifacts.sort_by_key(|a| a.modified);
        let ids: Vec<_> = artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let backend = InMemoryHistoryBackend::new();
        let err = backend
            .delete(&ArtifactInfo {
                id: "ghost".to_string(),
                kind: ArtifactKind::Session,
                modified: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
