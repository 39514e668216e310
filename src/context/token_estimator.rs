//! Token estimation using tiktoken
//!
//! Counting is not additive: BPE merges across boundaries, so callers must
//! not assume `estimate(a + b) == estimate(a) + estimate(b)`.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tracing::{debug, warn};

/// Encoding used when a model's tokenizer profile is unknown
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Loaded encoders, keyed by model name (or the default encoding name)
static BPE_CACHE: Lazy<DashMap<String, Arc<CoreBPE>>> = Lazy::new(DashMap::new);

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Tokenizer could not be initialised at all
#[derive(Debug, thiserror::Error)]
#[error("Tokenizer initialization failed: {0}")]
pub struct TokenizerError(pub String);

/// Tiktoken-based token estimator
///
/// Unknown model profiles fall back to `cl100k_base` instead of failing.
/// Availability wins over precision here: a slightly wrong count is better
/// than refusing to trim a conversation.
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
    model: String,
    fallback: bool,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self, TokenizerError> {
        Ok(Self {
            bpe: default_bpe()?,
            model: DEFAULT_ENCODING.to_string(),
            fallback: false,
        })
    }

    /// Resolve the encoder for a model name, falling back to the default encoding
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        if let Some(bpe) = BPE_CACHE.get(model) {
            return Ok(Self {
                bpe: bpe.clone(),
                model: model.to_string(),
                fallback: false,
            });
        }

        match get_bpe_from_model(model) {
            Ok(bpe) => {
                debug!("Loaded tokenizer profile for model {}", model);
                let bpe = Arc::new(bpe);
                BPE_CACHE.insert(model.to_string(), bpe.clone());
                Ok(Self {
                    bpe,
                    model: model.to_string(),
                    fallback: false,
                })
            }
            Err(e) => {
                warn!(
                    "Unknown tokenizer profile '{}' ({}), falling back to {}",
                    model, e, DEFAULT_ENCODING
                );
                Ok(Self {
                    bpe: default_bpe()?,
                    model: model.to_string(),
                    fallback: true,
                })
            }
        }
    }

    /// Model name this estimator was requested for
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the requested profile was unknown and the default encoding is in use
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

fn default_bpe() -> Result<Arc<CoreBPE>, TokenizerError> {
    if let Some(bpe) = BPE_CACHE.get(DEFAULT_ENCODING) {
        return Ok(bpe.clone());
    }
    let bpe = Arc::new(cl100k_base().map_err(|e| TokenizerError(e.to_string()))?);
    BPE_CACHE.insert(DEFAULT_ENCODING.to_string(), bpe.clone());
    Ok(bpe)
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Word-based token estimator (fallback, ~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::new().unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = estimator.estimate(text);
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_known_model_profile() {
        let estimator = TiktokenEstimator::for_model("gpt-4").unwrap();
        assert!(!estimator.is_fallback());
        assert_eq!(estimator.model(), "gpt-4");
        assert!(estimator.estimate("hello there") > 0);
    }

    #[test]
    fn test_unknown_model_falls_back_to_default_encoding() {
        let estimator = TiktokenEstimator::for_model("definitely-not-a-model").unwrap();
        assert!(estimator.is_fallback());

        let default = TiktokenEstimator::new().unwrap();
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(estimator.estimate(text), default.estimate(text));
    }

    #[test]
    fn test_word_based_estimator() {
        let estimator = WordBasedEstimator::default();
        assert_eq!(estimator.estimate("Hello world test"), 4);
        assert_eq!(WordBasedEstimator::new(1.0).estimate("a b c d e"), 5);
    }

    #[test]
    fn test_batch_estimation() {
        let estimator = TiktokenEstimator::new().unwrap();
        let tokens = estimator.estimate_batch(&["Hello", "world", "test"]);
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|&t| t > 0));
    }
}
