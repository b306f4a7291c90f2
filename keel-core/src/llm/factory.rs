//! Factory for creating inference providers from configuration

use std::sync::Arc;

use crate::config::{LLMProviderConfig, LLMProviderKind};
use crate::llm::{InferenceResult, LLMProvider, RetryConfig, RetryingProvider, StubLLMProvider};

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::OpenAIProvider;

/// Factory for creating inference providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create a provider from configuration, wrapped in retry handling
    /// when more than one attempt is configured.
    ///
    /// # Errors
    ///
    /// Returns [`crate::llm::InferenceError::NotConfigured`] if the provider
    /// cannot be created (missing API key, feature disabled).
    pub fn create(config: &LLMProviderConfig) -> InferenceResult<Arc<dyn LLMProvider>> {
        let provider: Arc<dyn LLMProvider> = match config.provider {
            #[cfg(feature = "llm-openai")]
            LLMProviderKind::OpenAI => {
                let provider = match &config.api_key {
                    Some(api_key) => match &config.base_url {
                        Some(base_url) => OpenAIProvider::with_base_url(
                            api_key.clone(),
                            config.model.clone(),
                            base_url.clone(),
                        ),
                        None => OpenAIProvider::new(api_key.clone(), config.model.clone()),
                    },
                    None => OpenAIProvider::from_env(config.model.clone())?,
                };
                Arc::new(provider)
            }

            #[cfg(not(feature = "llm-openai"))]
            LLMProviderKind::OpenAI => {
                return Err(crate::llm::InferenceError::NotConfigured(
                    "OpenAI provider requires 'llm-openai' feature".to_string(),
                ));
            }

            LLMProviderKind::Stub => Arc::new(StubLLMProvider),
        };

        tracing::info!(
            provider = %provider.model_info().provider,
            model = %provider.model_info().model_name,
            "Inference provider ready"
        );

        if config.retry_attempts > 1 {
            let retry = RetryConfig::default().with_max_attempts(config.retry_attempts);
            Ok(Arc::new(RetryingProvider::new(provider, retry)))
        } else {
            Ok(provider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stub() {
        let config = LLMProviderConfig {
            provider: LLMProviderKind::Stub,
            retry_attempts: 1,
            ..Default::default()
        };
        let provider = LLMProviderFactory::create(&config).unwrap();
        assert_eq!(provider.model_info().provider, "stub");
    }

    #[cfg(feature = "llm-openai")]
    #[test]
    fn test_create_openai_with_key() {
        let config = LLMProviderConfig {
            api_key: Some("test-key".to_string()),
            model: "gpt-4o-mini".to_string(),
            ..Default::default()
        };
        let provider = LLMProviderFactory::create(&config).unwrap();
        let info = provider.model_info();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.model_name, "gpt-4o-mini");
    }
}
