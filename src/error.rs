//! Error types
//!
//! Storage and quota errors are fatal to the operation that raised them and
//! are always surfaced. Summarizer and tokenizer-profile problems never show
//! up here: they are recovered locally with degraded behaviour.

use crate::config::ConfigError;
use crate::context::BudgetError;
use crate::history::HistoryError;
use crate::llm::CompletionError;
use crate::ratelimit::RateLimitError;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for crate-level operations
pub type Result<T> = std::result::Result<T, ConversationError>;

/// Durable storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// The underlying artifact did not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cannot archive an empty chat session: {session_id}")]
    EmptyHistory { session_id: String },

    #[error("No history found for session: {0}")]
    SessionNotFound(String),

    #[error("Rate limit exceeded for {resource}: {limit} calls per window, resets at {resets_at}")]
    QuotaExceeded {
        resource: String,
        limit: u64,
        resets_at: DateTime<Utc>,
    },

    #[error("Completion failed: {0}")]
    Completion(CompletionError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ConversationError {
    /// A quota rejection: the caller may retry after the window resets
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, ConversationError::QuotaExceeded { .. })
    }
}

impl From<HistoryError> for ConversationError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Storage(e) => ConversationError::Storage(e),
            HistoryError::EmptyHistory { session_id } => {
                ConversationError::EmptyHistory { session_id }
            }
            HistoryError::SessionNotFound(id) => ConversationError::SessionNotFound(id),
        }
    }
}

impl From<RateLimitError> for ConversationError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::QuotaExceeded {
                resource,
                limit,
                resets_at,
            } => ConversationError::QuotaExceeded {
                resource,
                limit,
                resets_at,
            },
            RateLimitError::Storage(e) => ConversationError::Storage(e),
        }
    }
}

impl From<CompletionError> for ConversationError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::RateLimited(e) => e.into(),
            other => ConversationError::Completion(other),
        }
    }
}

impl From<BudgetError> for ConversationError {
    fn from(err: BudgetError) -> Self {
        ConversationError::Configuration(err.to_string())
    }
}

impl From<ConfigError> for ConversationError {
    fn from(err: ConfigError) -> Self {
        ConversationError::Configuration(err.to_string())
    }
}
