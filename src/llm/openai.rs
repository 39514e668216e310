//! OpenAI-compatible chat completion client

use super::{CompletionClient, CompletionError};
use crate::context::Message;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the completion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token; never logged
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default)]
    pub max_tokens: Option<usize>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_endpoint() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_tokens: None,
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Completion client for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompatibleClient {
    client: Client,
    config: LlmConfig,
}

impl OpenAiCompatibleClient {
    /// Create a new client
    pub fn new(config: LlmConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CompletionError::InitializationError(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn build_request(&self, messages: &[Message]) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
        }
    }

    /// One HTTP request, returning the first choice
    async fn send_request(&self, request: &ChatCompletionRequest) -> Result<String, CompletionError> {
        let mut req = self.client.post(&self.config.endpoint).json(request);

        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req
            .send()
            .await
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let resp = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                CompletionError::InvalidResponse(format!("Failed to parse response: {}", e))
            })?;

        resp.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::InvalidResponse("No choices in response".to_string()))
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        debug!(
            "Requesting completion for {} messages from {}",
            messages.len(),
            self.config.model
        );

        let request = self.build_request(messages);
        let attempts = self.config.max_retries.max(1);

        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retry attempt {} for completion", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            match self.send_request(&request).await {
                Ok(content) => return Ok(content),
                Err(e) => last_error = Some(e),
            }
        }

        warn!("Completion failed after {} attempts", attempts);
        Err(last_error.unwrap_or(CompletionError::Unknown))
    }

    async fn complete_once(&self, messages: &[Message]) -> Result<String, CompletionError> {
        self.send_request(&self.build_request(messages)).await
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(server: &mockito::ServerGuard) -> LlmConfig {
        LlmConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            api_key: Some(SecretString::new("test-key".to_string())),
            max_retries: 2,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.max_retries, 3);
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#)
            .create_async()
            .await;

        let client = OpenAiCompatibleClient::new(config_for(&server)).unwrap();
        let reply = client.complete(&[Message::user("hello")]).await.unwrap();

        assert_eq!(reply, "Hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_retries_then_fails_on_http_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(2)
            .create_async()
            .await;

        let client = OpenAiCompatibleClient::new(config_for(&server)).unwrap();
        let err = client.complete(&[Message::user("hello")]).await.unwrap_err();

        assert!(matches!(err, CompletionError::ApiError(ref m) if m.contains("500")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_once_sends_a_single_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("busy")
            .expect(1)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.max_retries = 3;
        let client = OpenAiCompatibleClient::new(config).unwrap();
        let err = client.complete_once(&[Message::user("hello")]).await.unwrap_err();

        assert!(matches!(err, CompletionError::ApiError(ref m) if m.contains("503")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.max_retries = 1;
        let client = OpenAiCompatibleClient::new(config).unwrap();
        let err = client.complete(&[Message::user("hello")]).await.unwrap_err();

        assert!(matches!(err, CompletionError::InvalidResponse(_)));
    }
}
