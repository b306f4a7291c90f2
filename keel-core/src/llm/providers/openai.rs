//! OpenAI-compatible chat completions provider
//!
//! Works against api.openai.com, GitHub Models and Azure AI inference
//! endpoints. Images are sent as `image_url` content parts carrying a
//! base64 `data:` URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{
    InferenceError, InferenceResult, LLMProvider, LLMRequest, LLMResponse, Message, MessageRole,
    ModelInfo, TokenUsage,
};

/// GitHub Models inference endpoint
pub const DEFAULT_BASE_URL: &str = "https://models.inference.ai.azure.com";

/// OpenAI-compatible provider (GPT-4o and other vision-capable models)
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a provider against the default endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create with a custom base URL (api.openai.com, Azure OpenAI or
    /// another compatible API).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OPENAI_API_KEY`, falling back to `GITHUB_PAT` (required)
    /// - `OPENAI_BASE_URL` (optional, defaults to [`DEFAULT_BASE_URL`])
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::NotConfigured`] when no key is set.
    pub fn from_env(model: impl Into<String>) -> InferenceResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("GITHUB_PAT"))
            .map_err(|_| {
                InferenceError::NotConfigured(
                    "set OPENAI_API_KEY or GITHUB_PAT, or llm.api_key in keel.toml".to_string(),
                )
            })?;

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: OpenAIContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIMessageResponse>,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Convert messages, attaching images to the last user message
fn convert_messages(request: &LLMRequest) -> Vec<OpenAIMessage> {
    let image_target = if request.images.is_empty() {
        None
    } else {
        request
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)
    };

    request
        .messages
        .iter()
        .enumerate()
        .map(|(i, m): (usize, &Message)| {
            let content = if Some(i) == image_target {
                let mut parts = vec![ContentPart::Text {
                    text: m.content.clone(),
                }];
                parts.extend(request.images.iter().map(|image| ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                }));
                OpenAIContent::Parts(parts)
            } else {
                OpenAIContent::Text(m.content.clone())
            };

            OpenAIMessage {
                role: role_name(m.role),
                content,
            }
        })
        .collect()
}

/// Map a non-success status and body onto an error kind
fn status_error(status: u16, body: &str) -> InferenceError {
    let message = serde_json::from_str::<OpenAIError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        401 | 403 => InferenceError::Authentication(message),
        429 => InferenceError::RateLimited(message),
        _ => InferenceError::Api { status, message },
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_request(&self, request: &LLMRequest) -> InferenceResult<LLMResponse> {
        let openai_request = OpenAIRequest {
            model: self.model.clone(),
            messages: convert_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            model = %self.model,
            images = request.images.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status.as_u16(), &text));
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(format!("unreadable completion body: {}", e)))?;

        let content = openai_response
            .choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|m| m.content.clone())
            .ok_or_else(|| InferenceError::Malformed("completion has no message content".into()))?;

        let usage = openai_response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LLMResponse { content, usage })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model_name: self.model.clone(),
        }
    }
}
