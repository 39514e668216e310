//! Chat completion boundary
//!
//! The model is an external collaborator. Everything in this crate talks to
//! it through [`CompletionClient`], so tests can substitute a fake and the
//! HTTP client can be swapped for another provider.

pub mod guarded;
pub mod openai;

pub use guarded::GuardedCompletionClient;
pub use openai::{LlmConfig, OpenAiCompatibleClient};

use crate::context::Message;
use crate::ratelimit::RateLimitError;
use async_trait::async_trait;

/// A chat completion call: `complete(messages) -> text`
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Produce a reply; implementations may retry internally
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError>;

    /// Exactly one request to the model, no retries
    async fn complete_once(&self, messages: &[Message]) -> Result<String, CompletionError> {
        self.complete(messages).await
    }
}

/// Completion errors
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("Unknown error")]
    Unknown,
}
