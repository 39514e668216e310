//! Message trimming with token budget enforcement
//!
//! Reduces a conversation to fit a token budget before it is sent as model
//! context:
//! - Recency: keep the newest whole messages that fit
//! - Recency with summary: replace older messages by one synthetic summary,
//!   then clamp with recency if that still overflows
//!
//! A non-empty input never produces an empty context. Summarizer failures
//! degrade to a sentinel summary and are never propagated.

use super::models::{concat_contents, Message};
use super::summarizer::Summarizer;
use super::token_budget::{TrimBudget, TrimStrategy};
use super::token_estimator::TokenEstimator;
use crate::metrics::METRICS;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the synthetic message carrying the summary
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]: ";

/// Summary text used when the summarizer call fails
pub const SUMMARY_FAILED: &str = "[Summarization failed due to an error]";

/// Summary text used when no summarizer is configured
pub const SUMMARY_UNAVAILABLE: &str = "[Summarization failed: LLM not available]";

/// What happened to the summarization step of a trim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarizationOutcome {
    /// No summary was produced (fast path, recency strategy, or too few messages)
    NotNeeded,
    /// Older messages were replaced by a summary
    Summarized,
    /// The summarizer failed; a sentinel summary was used instead
    Degraded(String),
}

/// Result of a trim with bookkeeping
#[derive(Debug, Clone)]
pub struct TrimReport {
    pub messages: Vec<Message>,
    pub original_count: usize,
    pub total_tokens: usize,
    pub summarization: SummarizationOutcome,
    /// Recency clamp was applied after summarization
    pub clamped: bool,
}

/// Trims message history to a token budget
pub struct MessageTrimmer {
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl MessageTrimmer {
    /// Create a new trimmer; `summarizer` is only used by the summary strategy
    pub fn new(
        estimator: Arc<dyn TokenEstimator>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        Self {
            estimator,
            summarizer,
        }
    }

    /// Token count of the concatenated message contents
    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        self.estimator.estimate(&concat_contents(messages))
    }

    /// Trim `messages` to `budget`, returning the messages to send
    pub async fn trim(&self, messages: &[Message], budget: &TrimBudget) -> Vec<Message> {
        self.trim_with_report(messages, budget).await.messages
    }

    /// Trim `messages` to `budget` and report how it was done
    pub async fn trim_with_report(&self, messages: &[Message], budget: &TrimBudget) -> TrimReport {
        let report = match budget.strategy {
            TrimStrategy::Recency => {
                let trimmed = self.trim_by_recency(messages, budget.max_tokens);
                self.report(messages, trimmed, SummarizationOutcome::NotNeeded, false)
            }
            TrimStrategy::RecencyWithSummary => {
                self.trim_by_summarization(messages, budget).await
            }
        };

        METRICS.record_trim(
            budget.strategy.as_str(),
            report.total_tokens,
            budget.remaining(report.total_tokens),
            report.messages.len() < report.original_count,
        );

        debug!(
            "Trimmed {} messages to {} ({} tokens, budget {})",
            report.original_count,
            report.messages.len(),
            report.total_tokens,
            budget.max_tokens
        );

        report
    }

    /// Keep the newest whole messages whose combined content fits `max_tokens`
    ///
    /// Each candidate suffix is counted as concatenated text, since tokenizers
    /// merge across message boundaries and per-message counts do not add up.
    /// Scanning stops at the first message that does not fit; nothing older
    /// is considered. If even the newest message does not fit it is returned
    /// alone.
    pub fn trim_by_recency(&self, messages: &[Message], max_tokens: usize) -> Vec<Message> {
        let mut start = messages.len();
        while start > 0 && self.count_tokens(&messages[start - 1..]) <= max_tokens {
            start -= 1;
        }

        if start == messages.len() {
            if let Some(last) = messages.last() {
                warn!(
                    "Most recent message alone exceeds budget of {} tokens; keeping it anyway",
                    max_tokens
                );
                return vec![last.clone()];
            }
        }

        messages[start..].to_vec()
    }

    async fn trim_by_summarization(&self, messages: &[Message], budget: &TrimBudget) -> TrimReport {
        if self.count_tokens(messages) <= budget.max_tokens {
            return self.report(messages, messages.to_vec(), SummarizationOutcome::NotNeeded, false);
        }

        if messages.len() <= budget.keep_recent_count {
            let trimmed = self.trim_by_recency(messages, budget.max_tokens);
            return self.report(messages, trimmed, SummarizationOutcome::NotNeeded, false);
        }

        let split = messages.len() - budget.keep_recent_count;
        let (older, recent) = messages.split_at(split);

        let (summary, outcome) = self.summarize(older).await;

        let mut combined = Vec::with_capacity(recent.len() + 1);
        combined.push(Message::system(format!("{}{}", SUMMARY_PREFIX, summary)));
        combined.extend_from_slice(recent);

        if self.count_tokens(&combined) > budget.max_tokens {
            warn!("Summary plus recent messages still exceed token budget; applying recency trimming");
            let clamped = self.trim_by_recency(&combined, budget.max_tokens);
            return self.report(messages, clamped, outcome, true);
        }

        info!(
            "Summarized {} older messages, kept {} recent",
            older.len(),
            recent.len()
        );
        self.report(messages, combined, outcome, false)
    }

    async fn summarize(&self, older: &[Message]) -> (String, SummarizationOutcome) {
        let Some(summarizer) = &self.summarizer else {
            warn!("No summarizer configured; using sentinel summary");
            METRICS.record_summarization(true);
            return (
                SUMMARY_UNAVAILABLE.to_string(),
                SummarizationOutcome::Degraded("no summarizer configured".to_string()),
            );
        };

        match summarizer.summarize(older).await {
            Ok(summary) => {
                METRICS.record_summarization(false);
                (summary, SummarizationOutcome::Summarized)
            }
            Err(e) => {
                warn!("Error during summarization: {}", e);
                METRICS.record_summarization(true);
                (
                    SUMMARY_FAILED.to_string(),
                    SummarizationOutcome::Degraded(e.to_string()),
                )
            }
        }
    }

    fn report(
        &self,
        original: &[Message],
        messages: Vec<Message>,
        summarization: SummarizationOutcome,
        clamped: bool,
    ) -> TrimReport {
        TrimReport {
            total_tokens: self.count_tokens(&messages),
            original_count: original.len(),
            messages,
            summarization,
            clamped,
        }
    }
}
