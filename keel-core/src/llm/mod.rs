//! Model inference client
//!
//! Stages talk to the external model through [`LLMProvider`]. A request is a
//! short conversation plus optional image attachments; the reply is raw text
//! that the caller turns into JSON with [`crate::parsing::JsonParser`].

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::parsing::{JsonParser, OutputParser};

pub mod factory;
pub mod providers;
pub mod retry;
pub mod scripted;

pub use factory::LLMProviderFactory;
pub use retry::{RetryConfig, RetryingProvider, with_retry};
pub use scripted::{ScriptedProvider, ScriptedReply};

/// Result type for inference calls
pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

/// Failure kinds reported by an inference provider
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// Credentials missing or rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Provider asked us to slow down
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider answered but the body could not be used
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Call exceeded its deadline
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No usable provider configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl InferenceError {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::RateLimited(_) | InferenceError::Transport(_) => true,
            InferenceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Image sent alongside the last user message
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    /// MIME type such as `image/jpeg`
    pub media_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// `data:` URL carrying the base64-encoded image
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone, Default)]
pub struct LLMRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Images attached to the final user message
    pub images: Vec<ImageAttachment>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

impl LLMRequest {
    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    /// Create a request with system prompt
    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Concatenated text of every message, for logging and test assertions
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// Generated content
    pub content: String,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Trait for model inference providers.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a request and return the model's text reply.
    async fn generate_request(&self, request: &LLMRequest) -> InferenceResult<LLMResponse>;

    /// Generate text for a single user prompt.
    async fn generate(&self, prompt: &str) -> InferenceResult<String> {
        let response = self.generate_request(&LLMRequest::from_prompt(prompt)).await?;
        Ok(response.content)
    }

    /// Generate a reply and recover a JSON object from it.
    ///
    /// Replies without a recoverable object surface as
    /// [`InferenceError::Malformed`].
    async fn generate_structured(
        &self,
        request: &LLMRequest,
    ) -> InferenceResult<serde_json::Map<String, serde_json::Value>> {
        let response = self.generate_request(request).await?;
        JsonParser::new()
            .parse(&response.content)
            .map_err(|e| InferenceError::Malformed(e.to_string()))
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Offline provider that answers every request with an empty JSON object.
///
/// Stages that can fall back to heuristics (performance curves) still
/// produce output; stages that need real answers (image analysis) report a
/// malformed reply.
pub struct StubLLMProvider;

#[async_trait]
impl LLMProvider for StubLLMProvider {
    async fn generate_request(&self, _request: &LLMRequest) -> InferenceResult<LLMResponse> {
        Ok(LLMResponse {
            content: "{}".to_string(),
            usage: None,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "stub".to_string(),
            model_name: "none".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = LLMRequest::with_system_prompt("You are a naval architect", "Estimate")
            .with_temperature(5.0)
            .with_max_tokens(300)
            .with_image(ImageAttachment::new("image/png", vec![1, 2, 3]));

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.temperature, Some(2.0));
        assert_eq!(request.max_tokens, Some(300));
        assert_eq!(request.images.len(), 1);
        assert_eq!(request.prompt_text(), "You are a naval architect\nEstimate");
    }

    #[test]
    fn test_image_data_url() {
        let image = ImageAttachment::new("image/jpeg", b"boat".to_vec());
        assert_eq!(image.data_url(), "data:image/jpeg;base64,Ym9hdA==");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(InferenceError::RateLimited("slow down".into()).is_retryable());
        assert!(InferenceError::Transport("reset".into()).is_retryable());
        assert!(
            InferenceError::Api {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            !InferenceError::Api {
                status: 400,
                message: "bad request".into()
            }
            .is_retryable()
        );
        assert!(!InferenceError::Authentication("bad key".into()).is_retryable());
        assert!(!InferenceError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[tokio::test]
    async fn test_stub_provider_structured() {
        let provider = StubLLMProvider;
        let object = provider
            .generate_structured(&LLMRequest::from_prompt("anything"))
            .await
            .unwrap();
        assert!(object.is_empty());
        assert_eq!(provider.model_info().provider, "stub");
    }
}
