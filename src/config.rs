//! Layered configuration
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed `CONVO__`, with `__` between keys
//!    (e.g. `CONVO__TOKEN_BUDGET__MAX_TOKENS=2000`)
//! 4. The legacy `TRIMMING_STRATEGY` variable
//!
//! A `.env` file in the working directory is loaded before the environment
//! layer is read.

use crate::context::{TrimBudget, TrimStrategy};
use crate::llm::LlmConfig;
use crate::logging::LoggingConfig;
use crate::ratelimit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "CONVO";

/// Legacy strategy override
pub const LEGACY_STRATEGY_VAR: &str = "TRIMMING_STRATEGY";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Token budget section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_strategy")]
    pub strategy: TrimStrategy,

    #[serde(default = "default_keep_recent")]
    pub keep_recent_count: usize,

    /// Model whose tokenizer is used for counting
    #[serde(default = "default_tokenizer_model")]
    pub tokenizer_model: String,
}

fn default_max_tokens() -> usize {
    TrimBudget::default().max_tokens
}

fn default_strategy() -> TrimStrategy {
    TrimBudget::default().strategy
}

fn default_keep_recent() -> usize {
    TrimBudget::default().keep_recent_count
}

fn default_tokenizer_model() -> String {
    "gpt-4".to_string()
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            strategy: default_strategy(),
            keep_recent_count: default_keep_recent(),
            tokenizer_model: default_tokenizer_model(),
        }
    }
}

impl TokenBudgetConfig {
    pub fn budget(&self) -> TrimBudget {
        TrimBudget::new(self.max_tokens, self.strategy).with_keep_recent(self.keep_recent_count)
    }
}

/// History section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory for live session files and archives
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,

    /// Maximum number of persisted artifacts
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("data/chat_sessions")
}

fn default_max_files() -> usize {
    10
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            session_dir: default_session_dir(),
            max_files: default_max_files(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub token_budget: TokenBudgetConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let mut loaded: Config = builder.build()?.try_deserialize()?;
        loaded.apply_strategy_override(std::env::var(LEGACY_STRATEGY_VAR).ok().as_deref())?;
        loaded.validate()?;

        info!(
            "Configuration loaded: strategy={}, max_tokens={}, max_files={}",
            loaded.token_budget.strategy, loaded.token_budget.max_tokens, loaded.history.max_files
        );
        Ok(loaded)
    }

    /// Apply a legacy strategy name (`smart`, `summarization`, ...) if present
    pub fn apply_strategy_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.token_budget.strategy = value
                .parse()
                .map_err(|e: crate::context::BudgetError| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Reject settings that would make the manager unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token_budget
            .budget()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.history.max_files == 0 {
            return Err(ConfigError::Invalid(
                "history.max_files must be greater than zero".to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_budget.strategy, TrimStrategy::Recency);
        assert_eq!(config.history.max_files, 10);
        assert_eq!(config.rate_limit.authenticated_limit, 5000);
        assert_eq!(config.rate_limit.anonymous_limit, 1000);
        assert_eq!(config.rate_limit.window_secs, 3600);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.token_budget.max_tokens = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.history.max_files = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_legacy_strategy_names() {
        let mut config = Config::default();
        config.apply_strategy_override(Some("summarization")).unwrap();
        assert_eq!(config.token_budget.strategy, TrimStrategy::RecencyWithSummary);

        config.apply_strategy_override(Some("smart")).unwrap();
        assert_eq!(config.token_budget.strategy, TrimStrategy::Recency);

        config.apply_strategy_override(None).unwrap();
        assert_eq!(config.token_budget.strategy, TrimStrategy::Recency);

        assert!(config.apply_strategy_override(Some("random")).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("convo.toml");
        std::fs::write(
            &path,
            r#"
[token_budget]
max_tokens = 2000
strategy = "recency_with_summary"
keep_recent_count = 4

[history]
session_dir = "/tmp/sessions"
max_files = 3

[rate_limit]
anonymous_limit = 60
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();

        let budget = config.token_budget.budget();
        assert_eq!(budget.max_tokens, 2000);
        assert_eq!(budget.keep_recent_count, 4);
        assert_eq!(config.history.max_files, 3);
        assert_eq!(config.rate_limit.anonymous_limit, 60);
        // Unset keys keep their defaults
        assert_eq!(config.rate_limit.authenticated_limit, 5000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
