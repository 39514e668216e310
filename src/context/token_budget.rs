//! Token budget configuration for history trimming
//!
//! A budget caps the tokens of conversation context sent to the model:
//! - `max_tokens`: hard ceiling for the trimmed context
//! - `strategy`: pure recency, or recency with a summary of the overflow
//! - `keep_recent_count`: messages kept verbatim by the summary strategy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How overflowing history is reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimStrategy {
    /// Keep the newest messages that fit
    #[serde(alias = "smart")]
    Recency,
    /// Summarize older messages, keep the newest verbatim
    #[serde(alias = "summarization")]
    RecencyWithSummary,
}

impl TrimStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrimStrategy::Recency => "recency",
            TrimStrategy::RecencyWithSummary => "recency_with_summary",
        }
    }
}

impl fmt::Display for TrimStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrimStrategy {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recency" | "smart" => Ok(TrimStrategy::Recency),
            "recency_with_summary" | "summarization" | "summary" => {
                Ok(TrimStrategy::RecencyWithSummary)
            }
            other => Err(BudgetError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Token budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimBudget {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_strategy")]
    pub strategy: TrimStrategy,
    #[serde(default = "default_keep_recent")]
    pub keep_recent_count: usize,
}

fn default_max_tokens() -> usize {
    4096
}

fn default_strategy() -> TrimStrategy {
    TrimStrategy::Recency
}

fn default_keep_recent() -> usize {
    6
}

impl Default for TrimBudget {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            strategy: default_strategy(),
            keep_recent_count: default_keep_recent(),
        }
    }
}

impl TrimBudget {
    pub fn new(max_tokens: usize, strategy: TrimStrategy) -> Self {
        Self {
            max_tokens,
            strategy,
            ..Self::default()
        }
    }

    pub fn with_keep_recent(mut self, keep_recent_count: usize) -> Self {
        self.keep_recent_count = keep_recent_count;
        self
    }

    /// Validate that the budget configuration is usable
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_tokens == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if a given token count fits within the budget
    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.max_tokens
    }

    /// Tokens left after `used`, saturating at zero
    pub fn remaining(&self, used: usize) -> usize {
        self.max_tokens.saturating_sub(used)
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("Unknown trimming strategy: {0}")]
    UnknownStrategy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_is_valid() {
        let budget = TrimBudget::default();
        assert!(budget.validate().is_ok());
        assert_eq!(budget.keep_recent_count, 6);
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let budget = TrimBudget::new(0, TrimStrategy::Recency);
        assert!(matches!(
            budget.validate(),
            Err(BudgetError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn test_strategy_accepts_legacy_names() {
        assert_eq!("smart".parse::<TrimStrategy>().unwrap(), TrimStrategy::Recency);
        assert_eq!(
            "summarization".parse::<TrimStrategy>().unwrap(),
            TrimStrategy::RecencyWithSummary
        );
        assert_eq!(
            "Recency_With_Summary".parse::<TrimStrategy>().unwrap(),
            TrimStrategy::RecencyWithSummary
        );
        assert!("fifo".parse::<TrimStrategy>().is_err());
    }

    #[test]
    fn test_strategy_deserializes_alias() {
        let budget: TrimBudget =
            serde_json::from_str(r#"{"max_tokens": 100, "strategy": "smart"}"#).unwrap();
        assert_eq!(budget.strategy, TrimStrategy::Recency);
        assert_eq!(budget.keep_recent_count, 6);
    }

    #[test]
    fn test_remaining() {
        let budget = TrimBudget::new(100, TrimStrategy::Recency);
        assert!(budget.fits(100));
        assert!(!budget.fits(101));
        assert_eq!(budget.remaining(40), 60);
        assert_eq!(budget.remaining(140), 0);
    }
}
