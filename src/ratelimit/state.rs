//! Persisted sliding-window counter

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Window state as seen by a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Accepting calls while `count < limit`
    WithinWindow,
    /// Window elapsed; the counter will be reset
    WindowExpired,
    /// Limit reached; calls are rejected until the window resets
    LimitExceeded,
}

/// Call counter for one guarded resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub count: u64,
    pub window_start: DateTime<Utc>,
}

impl RateLimitState {
    /// A new, empty window starting at `now`
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// The window resets entirely once its start is more than `window` in the past
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.window_start > window
    }

    /// When the current window ends
    pub fn resets_at(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + window
    }

    /// Classify this state against `limit` at `now`
    pub fn classify(&self, now: DateTime<Utc>, window: Duration, limit: u64) -> WindowState {
        if self.is_expired(now, window) {
            WindowState::WindowExpired
        } else if self.count >= limit {
            WindowState::LimitExceeded
        } else {
            WindowState::WithinWindow
        }
    }
}
