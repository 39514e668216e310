//! Persistence contract for session histories and archives

use crate::context::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use crate::error::StorageError;

/// Kind of persisted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Live, appendable session log
    Session,
    /// Immutable transcript export
    Archive,
}

/// A persisted artifact with its last modification time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub id: String,
    pub kind: ArtifactKind,
    pub modified: DateTime<Utc>,
}

/// Storage layer behind [`super::HistoryStore`]
///
/// Implementations persist synchronously: once a write returns `Ok`, the data
/// is durable as far as the backend can guarantee.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Whether a live session artifact exists
    async fn exists(&self, session_id: &str) -> Result<bool, StorageError>;

    /// Load a session's messages; a missing session is an empty history
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Append one message, creating the session artifact if needed
    async fn append(&self, session_id: &str, message: &Message) -> Result<(), StorageError>;

    /// Truncate a session to an empty history, creating it if needed
    async fn clear(&self, session_id: &str) -> Result<(), StorageError>;

    /// Write an immutable archive transcript
    async fn write_archive(&self, archive_id: &str, transcript: &str) -> Result<(), StorageError>;

    /// All persisted artifacts, live and archived
    async fn list_with_mod_times(&self) -> Result<Vec<ArtifactInfo>, StorageError>;

    /// Remove an artifact
    async fn delete(&self, artifact: &ArtifactInfo) -> Result<(), StorageError>;
}

/// Session and archive ids become file names, so they are restricted to a
/// safe character set.
pub fn validate_id(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}
