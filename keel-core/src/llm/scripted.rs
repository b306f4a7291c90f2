//! Scripted provider for deterministic and offline pipelines
//!
//! Replies come from prompt-matching rules first, then from a FIFO queue,
//! then from a fallback. Every request is recorded so tests can assert on
//! what a stage actually asked for.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{InferenceError, InferenceResult, LLMProvider, LLMRequest, LLMResponse, ModelInfo};

/// Predetermined reply for one inference call
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text
    Text(String),
    /// Fail with this error
    Error(InferenceError),
    /// Sleep, then produce the inner reply
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        ScriptedReply::Text(value.to_string())
    }

    pub fn delayed(delay: Duration, reply: ScriptedReply) -> Self {
        ScriptedReply::Delayed(delay, Box::new(reply))
    }
}

pub struct ScriptedProvider {
    rules: Vec<(String, ScriptedReply)>,
    queue: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    requests: Mutex<Vec<LLMRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Provider that answers `{}` to everything
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback: ScriptedReply::text("{}"),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a reply for the next unmatched call
    pub fn reply(self, reply: ScriptedReply) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(reply);
        }
        self
    }

    /// Answer every call whose prompt text contains `needle`
    pub fn on_prompt(mut self, needle: impl Into<String>, reply: ScriptedReply) -> Self {
        self.rules.push((needle.into(), reply));
        self
    }

    /// Reply used once rules and queue are exhausted
    pub fn fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self, request: &LLMRequest) -> ScriptedReply {
        let prompt = request.prompt_text();
        if let Some((_, reply)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle)) {
            return reply.clone();
        }

        self.queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate_request(&self, request: &LLMRequest) -> InferenceResult<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let mut reply = self.next_reply(request);
        loop {
            match reply {
                ScriptedReply::Text(content) => {
                    return Ok(LLMResponse {
                        content,
                        usage: None,
                    });
                }
                ScriptedReply::Error(err) => return Err(err),
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "scripted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_then_queue_then_fallback() {
        let provider = ScriptedProvider::new()
            .on_prompt("hull", ScriptedReply::text("rule"))
            .reply(ScriptedReply::text("first"))
            .fallback(ScriptedReply::text("fallback"));

        assert_eq!(provider.generate("describe the hull").await.unwrap(), "rule");
        assert_eq!(provider.generate("other").await.unwrap(), "first");
        assert_eq!(provider.generate("other").await.unwrap(), "fallback");
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.requests()[0].prompt_text(), "describe the hull");
    }

    #[tokio::test]
    async fn test_error_reply() {
        let provider = ScriptedProvider::new()
            .reply(ScriptedReply::Error(InferenceError::RateLimited("busy".into())));
        assert!(matches!(
            provider.generate("x").await,
            Err(InferenceError::RateLimited(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_waits() {
        let provider = ScriptedProvider::new().reply(ScriptedReply::delayed(
            Duration::from_secs(30),
            ScriptedReply::text("late"),
        ));

        let started = tokio::time::Instant::now();
        assert_eq!(provider.generate("x").await.unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
