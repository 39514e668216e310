//! Durable per-session message log with retention-based eviction

use super::backend::{ArtifactInfo, ArtifactKind, HistoryBackend, StorageError};
use super::file_backend::FileHistoryBackend;
use super::transcript;
use crate::context::{Message, Role};
use crate::metrics::METRICS;
use chrono::Local;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// History store errors
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Cannot archive an empty chat session: {session_id}")]
    EmptyHistory { session_id: String },

    #[error("No history found for session: {0}")]
    SessionNotFound(String),
}

/// Owns all sessions for their lifetime
///
/// Writers to the same session are serialised by a per-session lock. Session
/// creation (and the eviction it triggers) is serialised store-wide.
pub struct HistoryStore {
    backend: Arc<dyn HistoryBackend>,
    max_files: usize,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    creation_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn HistoryBackend>, max_files: usize) -> Self {
        Self {
            backend,
            max_files,
            session_locks: DashMap::new(),
            creation_lock: Mutex::new(()),
        }
    }

    /// Store backed by session files in `dir`
    pub async fn open_dir(dir: impl Into<PathBuf>, max_files: usize) -> Result<Self, HistoryError> {
        let backend = FileHistoryBackend::new(dir).await?;
        Ok(Self::new(Arc::new(backend), max_files))
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Whether a session has been persisted
    pub async fn exists(&self, session_id: &str) -> Result<bool, HistoryError> {
        Ok(self.backend.exists(session_id).await?)
    }

    /// Fail with `SessionNotFound` unless the session has been persisted
    pub async fn require(&self, session_id: &str) -> Result<(), HistoryError> {
        if self.exists(session_id).await? {
            Ok(())
        } else {
            Err(HistoryError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Create a brand-new session with a time-derived id
    pub async fn create_session(&self) -> Result<String, HistoryError> {
        let session_id = format!(
            "session_{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            short_id()
        );
        self.open_session(&session_id).await?;
        Ok(session_id)
    }

    /// Make sure a session exists; returns `true` if it was created
    ///
    /// Resuming an existing session never evicts anything.
    pub async fn open_session(&self, session_id: &str) -> Result<bool, HistoryError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        self.ensure_session(session_id).await
    }

    /// Eviction runs before the first write of a new session; caller holds the session lock
    async fn ensure_session(&self, session_id: &str) -> Result<bool, HistoryError> {
        if self.backend.exists(session_id).await? {
            return Ok(false);
        }

        let _creating = self.creation_lock.lock().await;
        if self.backend.exists(session_id).await? {
            return Ok(false);
        }

        self.enforce_max_files(&[session_id]).await?;
        self.backend.clear(session_id).await?;
        info!("Created new chat session: {}", session_id);
        Ok(true)
    }

    /// Append a message and persist it before returning
    ///
    /// On error the message is not durable and the turn must not be treated
    /// as committed.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Message, HistoryError> {
        let message = Message::new(role, content);

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        self.ensure_session(session_id).await?;
        self.backend.append(session_id, &message).await?;

        METRICS.record_history_append();
        debug!("Appended {} message to session {}", role, session_id);
        Ok(message)
    }

    /// Load a session; an unknown session is an empty history
    pub async fn load(&self, session_id: &str) -> Result<Vec<Message>, HistoryError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        Ok(self.backend.load(session_id).await?)
    }

    /// Truncate a session to an empty history
    ///
    /// Clearing an unknown session creates it, with the same eviction as any
    /// other new session.
    pub async fn clear(&self, session_id: &str) -> Result<(), HistoryError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        if self.ensure_session(session_id).await? {
            return Ok(());
        }
        self.backend.clear(session_id).await?;
        info!("Cleared chat session: {}", session_id);
        Ok(())
    }

    /// Render a session transcript without archiving it
    pub async fn transcript(&self, session_id: &str) -> Result<String, HistoryError> {
        let messages = self.load(session_id).await?;
        Ok(transcript::render(session_id, &messages))
    }

    /// Snapshot a session into an immutable transcript; returns the archive id
    ///
    /// An empty history is rejected rather than producing an empty archive.
    /// The archive counts as a new artifact, so retention is enforced first,
    /// sparing the session being archived.
    pub async fn archive(&self, session_id: &str) -> Result<String, HistoryError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let messages = self.backend.load(session_id).await?;
        if messages.is_empty() {
            warn!("Cannot archive an empty chat session: {}", session_id);
            return Err(HistoryError::EmptyHistory {
                session_id: session_id.to_string(),
            });
        }

        let text = transcript::render(session_id, &messages);
        let archive_id = format!(
            "chat_archive_{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            short_id()
        );

        {
            let _creating = self.creation_lock.lock().await;
            self.enforce_max_files(&[session_id]).await?;
            self.backend.write_archive(&archive_id, &text).await?;
        }

        METRICS.record_archive();
        info!(
            "Chat session {} archived as {} ({} messages)",
            session_id,
            archive_id,
            messages.len()
        );
        Ok(archive_id)
    }

    /// Delete the oldest artifacts so one more fits under `max_files`
    ///
    /// When `N >= max_files`, the `N - max_files + 1` oldest artifacts by
    /// modification time are removed, never touching `protected` sessions.
    /// Returns the number of artifacts deleted.
    pub async fn enforce_max_files(&self, protected: &[&str]) -> Result<usize, HistoryError> {
        let mut artifacts = self.backend.list_with_mod_times().await?;
        let total = artifacts.len();
        if total < self.max_files {
            return Ok(0);
        }

        let protected: HashSet<&str> = protected.iter().copied().collect();
        artifacts.retain(|a| !protected.contains(a.id.as_str()));
        artifacts.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id)));

        let num_to_delete = total + 1 - self.max_files;
        let mut deleted = 0;
        for artifact in artifacts.iter().take(num_to_delete) {
            self.delete_artifact(artifact).await?;
            deleted += 1;
        }

        METRICS.record_evictions(deleted);
        Ok(deleted)
    }

    async fn delete_artifact(&self, artifact: &ArtifactInfo) -> Result<(), HistoryError> {
        match self.backend.delete(artifact).await {
            Ok(()) => info!("Removed old chat history artifact: {}", artifact.id),
            Err(e) if e.is_not_found() => debug!("Artifact {} already removed", artifact.id),
            Err(e) => return Err(e.into()),
        }
        if artifact.kind == ArtifactKind::Session {
            self.session_locks
                .remove_if(&artifact.id, |_, lock| Arc::strong_count(lock) == 1);
        }
        Ok(())
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory_backend::InMemoryHistoryBackend;
    use chrono::{Duration, Utc};

    async fn seeded(count: usize) -> (Arc<InMemoryHistoryBackend>, Vec<String>) {
        let backend = Arc::new(InMemoryHistoryBackend::new());
        let base = Utc::now() - Duration::hours(1);
        let mut ids = Vec::new();
        for i in 0..count {
            let id = format!("old_{:02}", i);
            let modified = base + Duration::seconds(i as i64);
            if i % 3 == 2 {
                backend.insert_archive_at(&id, "transcript", modified).await;
            } else {
                backend
                    .insert_session_at(&id, vec![Message::user("x")], modified)
                    .await;
            }
            ids.push(id);
        }
        (backend, ids)
    }

    #[tokio::test]
    async fn test_new_session_evicts_oldest_artifacts() {
        let (backend, ids) = seeded(12).await;
        let store = HistoryStore::new(backend.clone(), 10);

        let created = store.open_session("fresh").await.unwrap();
        assert!(created);

        let remaining: HashSet<String> = backend
            .list_with_mod_times()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();

        for evicted in &ids[..3] {
            assert!(!remaining.contains(evicted), "{} should be evicted", evicted);
        }
        for kept in &ids[3..] {
            assert!(remaining.contains(kept), "{} should be kept", kept);
        }
        assert!(remaining.contains("fresh"));
        assert_eq!(remaining.len(), 10);
    }

    #[tokio::test]
    async fn test_resuming_session_never_evicts() {
        let (backend, _) = seeded(12).await;
        let store = HistoryStore::new(backend.clone(), 10);

        let created = store.open_session("old_05").await.unwrap();
        assert!(!created);
        store.append("old_05", Role::User, "again").await.unwrap();

        assert_eq!(backend.artifact_count().await, 12);
    }

    #[tokio::test]
    async fn test_below_limit_keeps_everything() {
        let (backend, _) = seeded(5).await;
        let store = HistoryStore::new(backend.clone(), 10);

        store.append("fresh", Role::User, "hi").await.unwrap();
        assert_eq!(backend.artifact_count().await, 6);
    }

    #[tokio::test]
    async fn test_append_load_and_clear() {
        let store = HistoryStore::new(Arc::new(InMemoryHistoryBackend::new()), 10);

        assert!(store.load("s1").await.unwrap().is_empty());

        store.append("s1", Role::User, "hi").await.unwrap();
        store.append("s1", Role::Assistant, "hello").await.unwrap();

        let messages = store.load("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);

        store.clear("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_empty());
        assert!(store.exists("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clearing_unknown_session_evicts_like_creation() {
        let (backend, ids) = seeded(3).await;
        let store = HistoryStore::new(backend.clone(), 3);

        store.clear("fresh").await.unwrap();

        assert_eq!(backend.artifact_count().await, 3);
        assert!(!backend.exists(&ids[0]).await.unwrap());
        assert!(store.exists("fresh").await.unwrap());
        assert!(store.load("fresh").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evicted_sessions_release_their_locks() {
        let (backend, ids) = seeded(3).await;
        let store = HistoryStore::new(backend.clone(), 3);
        store.load(&ids[0]).await.unwrap();
        assert!(store.session_locks.contains_key(&ids[0]));

        store.open_session("fresh").await.unwrap();

        assert!(!backend.exists(&ids[0]).await.unwrap());
        assert!(!store.session_locks.contains_key(&ids[0]));
        assert!(store.session_locks.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_archive_renders_transcript() {
        let backend = Arc::new(InMemoryHistoryBackend::new());
        let store = HistoryStore::new(backend.clone(), 10);

        store.append("s1", Role::User, "hi").await.unwrap();
        store.append("s1", Role::Assistant, "hello").await.unwrap();

        let archive_id = store.archive("s1").await.unwrap();
        assert!(archive_id.starts_with("chat_archive_"));

        let text = backend.archive(&archive_id).await.unwrap();
        let user = text.find("] User: hi").unwrap();
        let assistant = text.find("] Assistant: hello").unwrap();
        assert!(user < assistant);
        assert!(text.starts_with("Chat Session: s1\n"));
    }

    #[tokio::test]
    async fn test_archive_rejects_empty_history() {
        let backend = Arc::new(InMemoryHistoryBackend::new());
        let store = HistoryStore::new(backend.clone(), 10);
        store.open_session("empty").await.unwrap();

        let err = store.archive("empty").await.unwrap_err();
        assert!(matches!(err, HistoryError::EmptyHistory { .. }));
        assert_eq!(backend.artifact_count().await, 1);
    }

    #[tokio::test]
    async fn test_require_unknown_session() {
        let store = HistoryStore::new(Arc::new(InMemoryHistoryBackend::new()), 10);
        let err = store.require("missing").await.unwrap_err();
        assert!(matches!(err, HistoryError::SessionNotFound(id) if id == "missing"));

        store.open_session("present").await.unwrap();
        assert!(store.require("present").await.is_ok());
    }

    #[tokio::test]
    async fn test_archive_never_evicts_archived_session() {
        let backend = Arc::new(InMemoryHistoryBackend::new());
        let old = Utc::now() - Duration::hours(2);
        backend
            .insert_session_at("oldest", vec![Message::user("keep me")], old)
            .await;
        backend
            .insert_archive_at("chat_archive_prev", "text", old + Duration::seconds(1))
            .await;
        let store = HistoryStore::new(backend.clone(), 2);

        store.archive("oldest").await.unwrap();

        assert!(backend.exists("oldest").await.unwrap());
        assert!(backend.archive("chat_archive_prev").await.is_none());
        assert_eq!(backend.artifact_count().await, 2);
    }

    #[tokio::test]
    async fn test_create_session_generates_time_derived_id() {
        let store = HistoryStore::new(Arc::new(InMemoryHistoryBackend::new()), 10);
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();

        assert!(a.starts_with("session_"));
        assert_ne!(a, b);
        assert!(store.exists(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_same_session_are_all_kept() {
        let store = Arc::new(HistoryStore::new(
            Arc::new(InMemoryHistoryBackend::new()),
            10,
        ));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append("shared", Role::User, format!("msg {}", i))
                        .await
                        .unwrap();
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        assert_eq!(store.load("shared").await.unwrap().len(), 20);
    }
}
