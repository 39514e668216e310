//! Conversation context trimming with token budget enforcement
//!
//! This module keeps model context bounded: messages are counted with a
//! model-specific tokenizer and trimmed by recency, optionally replacing the
//! overflow with a summary produced by an injected summarizer.

pub mod models;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;
pub mod trimmer;

pub use models::{Message, Role};
pub use summarizer::{ConcatenationSummarizer, LlmSummarizer, Summarizer, SummarizerError};
pub use token_budget::{BudgetError, TrimBudget, TrimStrategy};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, TokenizerError, WordBasedEstimator};
pub use trimmer::{MessageTrimmer, SummarizationOutcome, TrimReport};
