//! Filesystem history backend
//!
//! One `<session_id>.json` file per live session (a pretty-printed JSON array
//! of messages) and one `<archive_id>.txt` transcript per archive, all in a
//! single directory. Writes go to a temporary file that is renamed into place.

use super::backend::{validate_id, ArtifactInfo, ArtifactKind, HistoryBackend, StorageError};
use crate::context::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const SESSION_EXT: &str = "json";
const ARCHIVE_EXT: &str = "txt";

/// Session files on local disk
pub struct FileHistoryBackend {
    dir: PathBuf,
}

impl FileHistoryBackend {
    /// Use `dir` as the session directory, creating it if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a live session file
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", session_id, SESSION_EXT))
    }

    /// Path of an archive transcript
    pub fn archive_path(&self, archive_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", archive_id, ARCHIVE_EXT))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or_default()
        ));

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

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(messages)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.write_atomic(&self.session_path(session_id), &json).await
    }

    async fn list_kind(&self, kind: ArtifactKind) -> Result<Vec<ArtifactInfo>, StorageError> {
        let ext = match kind {
            ArtifactKind::Session => SESSION_EXT,
            ArtifactKind::Archive => ARCHIVE_EXT,
        };
        let dir = self.dir.to_str().ok_or_else(|| {
            StorageError::Serialization(format!("non UTF-8 session directory: {:?}", self.dir))
        })?;
        let pattern = format!("{}/*.{}", glob::Pattern::escape(dir), ext);

        let paths = glob::glob(&pattern).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut artifacts = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                StorageError::io(path, e.into())
            })?;
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = match fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(t) => DateTime::<Utc>::from(t),
                // Removed between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(&path, e)),
            };
            artifacts.push(ArtifactInfo {
                id: id.to_string(),
                kind,
                modified,
            });
        }
        Ok(artifacts)
    }
}

#[async_trait]
impl HistoryBackend for FileHistoryBackend {
    async fn exists(&self, session_id: &str) -> Result<bool, StorageError> {
        validate_id(session_id)?;
        let path = self.session_path(session_id);
        fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        validate_id(session_id)?;
        let path = self.session_path(session_id);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        let messages: Vec<Message> =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                name: format!("session {}", session_id),
                reason: e.to_string(),
            })?;

        debug!("Loaded {} messages from session {}", messages.len(), session_id);
        Ok(messages)
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        let mut messages = self.load(session_id).await?;
        messages.push(message.clone());
        self.save(session_id, &messages).await
    }

    async fn clear(&self, session_id: &str) -> Result<(), StorageError> {
        validate_id(session_id)?;
        self.save(session_id, &[]).await
    }

    async fn write_archive(&self, archive_id: &str, transcript: &str) -> Result<(), StorageError> {
        validate_id(archive_id)?;
        self.write_atomic(&self.archive_path(archive_id), transcript.as_bytes())
            .await
    }

    async fn list_with_mod_times(&self) -> Result<Vec<ArtifactInfo>, StorageError> {
        let mut artifacts = self.list_kind(ArtifactKind::Session).await?;
        artifacts.extend(self.list_kind(ArtifactKind::Archive).await?);
        Ok(artifacts)
    }

    async fn delete(&self, artifact: &ArtifactInfo) -> Result<(), StorageError> {
        let path = match artifact.kind {
            ArtifactKind::Session => self.session_path(&artifact.id),
            ArtifactKind::Archive => self.archive_path(&artifact.id),
        };
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }
}
