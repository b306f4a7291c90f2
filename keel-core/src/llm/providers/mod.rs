//! Inference provider implementations

#[cfg(feature = "llm-openai")]
pub mod openai;

#[cfg(feature = "llm-openai")]
pub use openai::OpenAIProvider;
