//! Durable conversation history
//!
//! Append-only per-session message logs with:
//! - Synchronous persistence before `append` returns
//! - Plain-text archive export
//! - Retention cap on persisted artifacts (oldest evicted on new sessions)

pub mod backend;
pub mod file_backend;
pub mod memory_backend;
pub mod store;
pub mod transcript;

pub use backend::{ArtifactInfo, ArtifactKind, HistoryBackend, StorageError};
pub use file_backend::FileHistoryBackend;
pub use memory_backend::InMemoryHistoryBackend;
pub use store::{HistoryError, HistoryStore};
