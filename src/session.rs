//! Conversation session: one user turn at a time
//!
//! A turn persists the user message, trims the full history to the token
//! budget, asks the completion client for a reply over the trimmed context
//! and persists the reply.

use crate::context::{Message, MessageTrimmer, Role, SummarizationOutcome, TrimBudget};
use crate::error::{ConversationError, Result};
use crate::history::HistoryStore;
use crate::llm::{CompletionClient, GuardedCompletionClient};
use crate::metrics::METRICS;
use crate::ratelimit::RateLimitGuard;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a turn ended
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The assistant reply, already persisted
    Completed(Message),
    /// The turn was cancelled before a reply arrived; nothing was appended
    /// for the assistant
    Cancelled,
}

impl TurnOutcome {
    pub fn reply(&self) -> Option<&str> {
        match self {
            TurnOutcome::Completed(message) => Some(&message.content),
            TurnOutcome::Cancelled => None,
        }
    }
}

/// Ties history, trimming and the completion call together for one session
pub struct ConversationSession {
    session_id: String,
    history: Arc<HistoryStore>,
    trimmer: Arc<MessageTrimmer>,
    budget: TrimBudget,
    client: Arc<dyn CompletionClient>,
}

impl ConversationSession {
    /// Open `session_id`, or start a brand-new session when `None`
    ///
    /// Starting a new session may evict the oldest persisted artifacts;
    /// resuming one never does.
    pub async fn start(
        history: Arc<HistoryStore>,
        trimmer: Arc<MessageTrimmer>,
        budget: TrimBudget,
        client: Arc<dyn CompletionClient>,
        session_id: Option<&str>,
    ) -> Result<Self> {
        budget.validate()?;

        let session_id = match session_id {
            Some(id) => {
                if history.open_session(id).await? {
                    info!("Started session {}", id);
                } else {
                    info!("Resumed session {}", id);
                }
                id.to_string()
            }
            None => history.create_session().await?,
        };

        Ok(Self {
            session_id,
            history,
            trimmer,
            budget,
            client,
        })
    }

    /// Guard every reply request with `guard` under `resource` and `limit`
    ///
    /// This only wraps the session's own client. To put summarization under
    /// the same quota, give the summarizer a [`GuardedCompletionClient`] over
    /// the same guard and resource.
    pub fn with_quota(
        mut self,
        guard: Arc<RateLimitGuard>,
        resource: impl Into<String>,
        limit: u64,
    ) -> Self {
        self.client = Arc::new(GuardedCompletionClient::new(
            self.client,
            guard,
            resource,
            limit,
        ));
        self
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn budget(&self) -> &TrimBudget {
        &self.budget
    }

    /// Full persisted history of this session
    pub async fn history(&self) -> Result<Vec<Message>> {
        Ok(self.history.load(&self.session_id).await?)
    }

    /// Run one turn
    ///
    /// The user message is persisted first, so it survives even if the turn
    /// later fails on quota or on the completion call. A turn cancelled
    /// before the reply request is admitted consumes no quota for it.
    pub async fn send(&self, content: &str, cancel: &CancellationToken) -> Result<TurnOutcome> {
        self.history
            .append(&self.session_id, Role::User, content)
            .await?;

        let messages = self.history.load(&self.session_id).await?;
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.cancelled()),
            report = self.trimmer.trim_with_report(&messages, &self.budget) => report,
        };
        if let SummarizationOutcome::Degraded(reason) = &report.summarization {
            warn!(
                "Session {} continuing with degraded summary: {}",
                self.session_id, reason
            );
        }

        debug!(
            "Session {}: sending {} of {} messages ({} tokens)",
            self.session_id,
            report.messages.len(),
            report.original_count,
            report.total_tokens
        );

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.cancelled()),
            reply = self.client.complete(&report.messages) => reply,
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                let err = ConversationError::from(e);
                METRICS.record_turn(if err.is_quota_exceeded() {
                    "rejected"
                } else {
                    "failed"
                });
                return Err(err);
            }
        };

        let message = match self
            .history
            .append(&self.session_id, Role::Assistant, reply)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                METRICS.record_turn("failed");
                return Err(e.into());
            }
        };

        METRICS.record_turn("completed");
        Ok(TurnOutcome::Completed(message))
    }

    fn cancelled(&self) -> TurnOutcome {
        info!("Turn cancelled in session {}", self.session_id);
        METRICS.record_turn("cancelled");
        TurnOutcome::Cancelled
    }
}
