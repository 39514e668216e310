//! Summarization of overflowing conversation history

use super::models::{transcript, Message};
use crate::llm::{CompletionClient, CompletionError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize older messages into a concise brief
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizerError>;
}

/// Summarizer backed by a chat completion call
pub struct LlmSummarizer {
    client: Arc<dyn CompletionClient>,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Build summarization prompt
    fn build_prompt(messages: &[Message]) -> String {
        format!(
            "Concisely summarize the key points of the following conversation:\n\n{}",
            transcript(messages)
        )
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizerError> {
        if messages.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} messages", messages.len());

        let request = vec![
            Message::system(
                "You are a concise summarizer. Extract key information and compress it efficiently.",
            ),
            Message::user(Self::build_prompt(messages)),
        ];

        let summary = self.client.complete(&request).await?;
        debug!("Summarization successful");
        Ok(summary)
    }
}

/// Simple concatenation-based summarizer (offline fallback)
#[derive(Debug, Default)]
pub struct ConcatenationSummarizer;

#[async_trait]
impl Summarizer for ConcatenationSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizerError> {
        Ok(transcript(messages))
    }
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Summarizer unavailable: {0}")]
    Unavailable(String),
}
