//! Outbound quota policy
//!
//! Chooses the limit for a caller before the guard is consulted; the guard
//! itself only counts.

use serde::{Deserialize, Serialize};

/// Who is making the outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Calls carry credentials (e.g. an API token)
    Authenticated,
    Anonymous,
}

impl Identity {
    /// Authenticated when a credential is present
    pub fn from_credential<T>(credential: Option<T>) -> Self {
        if credential.is_some() {
            Identity::Authenticated
        } else {
            Identity::Anonymous
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Directory holding one state file per guarded resource
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Calls per window for authenticated callers
    #[serde(default = "default_authenticated_limit")]
    pub authenticated_limit: u64,

    /// Calls per window for anonymous callers
    #[serde(default = "default_anonymous_limit")]
    pub anonymous_limit: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_state_dir() -> String {
    "data/rate_limits".to_string()
}

fn default_authenticated_limit() -> u64 {
    5000
}

fn default_anonymous_limit() -> u64 {
    1000
}

fn default_window_secs() -> u64 {
    3600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            authenticated_limit: default_authenticated_limit(),
            anonymous_limit: default_anonymous_limit(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Limit that applies to `identity`
    pub fn limit_for(&self, identity: Identity) -> u64 {
        match identity {
            Identity::Authenticated => self.authenticated_limit,
            Identity::Anonymous => self.anonymous_limit,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit_for(Identity::Authenticated), 5000);
        assert_eq!(config.limit_for(Identity::Anonymous), 1000);
        assert_eq!(config.window(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_identity_from_credential() {
        assert_eq!(
            Identity::from_credential(Some("token")),
            Identity::Authenticated
        );
        assert_eq!(Identity::from_credential::<&str>(None), Identity::Anonymous);
    }
}
