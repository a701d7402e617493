//! Completion provider layer.
//!
//! The engine consumes completion backends through the narrow
//! [`CompletionProvider`] trait: one buffered call, one streaming call.
//! Concrete adapters:
//! - **Anthropic**: Messages API over HTTP
//! - **OpenAI**: Chat Completions API over HTTP
//! - **Degraded**: deterministic always-available fallback
//!
//! Providers are looked up by name in a [`ProviderRegistry`], which always
//! contains the degraded provider once constructed.

mod costs;
pub mod anthropic;
pub mod degraded;
#[cfg(test)]
pub(crate) mod mock;
pub mod openai;
pub mod registry;
pub(crate) mod sse;

pub use anthropic::AnthropicProvider;
pub use costs::completion_cost;
pub use degraded::DegradedProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use rust_decimal::Decimal;

use crate::error::ProviderError;

/// A lazily produced sequence of completion text chunks.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// One completion request, already rendered to a prompt.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
}

/// A buffered completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    /// Input + output tokens as reported by the backend.
    pub tokens_used: u64,
    pub cost: Decimal,
    /// Registry name of the provider that produced this response.
    pub provider: String,
    pub model: String,
    pub metadata: serde_json::Value,
}

/// A pluggable backend that turns a prompt into a completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Registry name of this provider.
    fn name(&self) -> &str;

    /// Produce a buffered completion.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Produce a chunk stream. Single-pass, not restartable; a mid-stream
    /// fault is surfaced as an `Err` item and ends the stream.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 4096,
            model: model.into(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}
