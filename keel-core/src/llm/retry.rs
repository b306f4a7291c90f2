//! Retry logic for inference providers
//!
//! Exponential backoff with jitter, applied only to failures that
//! [`InferenceError::is_retryable`] classifies as transient.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use super::{InferenceError, InferenceResult, LLMProvider, LLMRequest, LLMResponse, ModelInfo};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculate delay for a given retry (0-indexed)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(32) as i32);
        let clamped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.add_jitter {
            clamped * (1.0 + 0.25 * jitter_fraction())
        } else {
            clamped
        };

        Duration::from_millis(delay as u64)
    }
}

/// Uniform fraction in `[0, 1)`
fn jitter_fraction() -> f64 {
    rand::thread_rng().gen_range(0.0..1.0)
}

/// Execute an inference operation, retrying transient failures
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> InferenceResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = InferenceResult<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= config.max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::debug!(attempt, ?delay, error = %e, "Retrying inference call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Provider wrapper applying [`with_retry`] to every request
pub struct RetryingProvider {
    inner: Arc<dyn LLMProvider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LLMProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LLMProvider for RetryingProvider {
    async fn generate_request(&self, request: &LLMRequest) -> InferenceResult<LLMResponse> {
        with_retry(&self.config, || self.inner.generate_request(request)).await
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedProvider, ScriptedReply};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::default().with_jitter(false);
        assert_eq!(config.delay_for_attempt(0).as_millis(), 500);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 1000);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 2000);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::default()
            .with_jitter(false)
            .with_max_delay(Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = config.delay_for_attempt(1).as_millis();
            assert!((1000..1250).contains(&delay), "{}", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let attempts = AtomicUsize::new(0);
        let config = RetryConfig::default().with_max_attempts(3);

        let result = with_retry(&config, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(InferenceError::RateLimited("429".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = AtomicUsize::new(0);
        let config = RetryConfig::default().with_max_attempts(5);

        let result: InferenceResult<()> = with_retry(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(InferenceError::Authentication("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(InferenceError::Authentication(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_provider_exhausts_attempts() {
        let scripted = Arc::new(
            ScriptedProvider::new()
                .reply(ScriptedReply::Error(InferenceError::Transport("reset".into())))
                .reply(ScriptedReply::Error(InferenceError::Transport("reset".into())))
                .reply(ScriptedReply::text("{}")),
        );
        let provider = RetryingProvider::new(scripted.clone(), RetryConfig::default().with_max_attempts(2));

        let result = provider.generate("hello").await;
        assert!(matches!(result, Err(InferenceError::Transport(_))));
        assert_eq!(scripted.call_count(), 2);
    }
}
