//! Quota-guarded completion client
//!
//! Every request to the wrapped client is admitted by a [`RateLimitGuard`]
//! first. One admission buys exactly one request: the wrapped client's own
//! retry loop is bypassed.

use super::{CompletionClient, CompletionError};
use crate::context::Message;
use crate::ratelimit::RateLimitGuard;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Completion client that consumes one unit of `resource` per request
pub struct GuardedCompletionClient {
    inner: Arc<dyn CompletionClient>,
    guard: Arc<RateLimitGuard>,
    resource: String,
    limit: u64,
}

impl GuardedCompletionClient {
    pub fn new(
        inner: Arc<dyn CompletionClient>,
        guard: Arc<RateLimitGuard>,
        resource: impl Into<String>,
        limit: u64,
    ) -> Self {
        Self {
            inner,
            guard,
            resource: resource.into(),
            limit,
        }
    }
}

#[async_trait]
impl CompletionClient for GuardedCompletionClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        self.complete_once(messages).await
    }

    async fn complete_once(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let state = self.guard.check_and_increment(&self.resource, self.limit).await?;
        debug!(
            "Completion admitted on {} ({}/{})",
            self.resource, state.count, self.limit
        );
        self.inner.complete_once(messages).await
    }
}
