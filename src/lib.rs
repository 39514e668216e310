//! Bounded-resource conversation manager
//!
//! Two cooperating pieces keep a long-running chat service within its limits:
//! - Token-budget trimming of an unbounded message history before it is sent
//!   as model context, by recency or by summarizing the overflow
//! - A fixed-window quota guard over outbound calls, persisted across restarts
//!
//! [`session::ConversationSession`] composes them with a durable history
//! store and a completion client for one user turn at a time.

pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod ratelimit;
pub mod session;

pub use config::Config;
pub use error::{ConversationError, Result, StorageError};
pub use session::{ConversationSession, TurnOutcome};

/// Commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::{
        ConcatenationSummarizer, LlmSummarizer, Message, MessageTrimmer, Role, Summarizer,
        TiktokenEstimator, TokenEstimator, TrimBudget, TrimStrategy, WordBasedEstimator,
    };
    pub use crate::error::{ConversationError, Result};
    pub use crate::history::{FileHistoryBackend, HistoryStore, InMemoryHistoryBackend};
    pub use crate::llm::{CompletionClient, GuardedCompletionClient, OpenAiCompatibleClient};
    pub use crate::ratelimit::{
        FileRateLimitStore, Identity, InMemoryRateLimitStore, RateLimitGuard,
    };
    pub use crate::session::{ConversationSession, TurnOutcome};
}
