//! Always-available degraded provider.
//!
//! Last resort in every fallback chain: never fails, costs nothing, and
//! produces a deterministic acknowledgement instead of a real completion.
//! Keeps the engine answering (degraded) when every real backend is down
//! or none is configured.

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;

use crate::error::ProviderError;
use crate::llm::{CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream};
use crate::util::estimate_tokens;

/// Registry name the degraded provider is installed under.
pub const DEGRADED_PROVIDER: &str = "degraded";

/// Deterministic no-backend provider.
#[derive(Debug, Default)]
pub struct DegradedProvider;

impl DegradedProvider {
    pub fn new() -> Self {
        Self
    }

    fn render(&self, request: &CompletionRequest) -> String {
        let head: String = request.prompt.chars().take(120).collect();
        format!(
            "[degraded mode] No completion backend is currently reachable. \
             The request was received and acknowledged: {head}"
        )
    }
}

#[async_trait]
impl CompletionProvider for DegradedProvider {
    fn name(&self) -> &str {
        DEGRADED_PROVIDER
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let content = self.render(request);
        let tokens_used = estimate_tokens(&content);
        Ok(CompletionResponse {
            content,
            tokens_used,
            cost: Decimal::ZERO,
            provider: DEGRADED_PROVIDER.to_string(),
            model: request.model.clone(),
            metadata: serde_json::json!({ "degraded": true }),
        })
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let content = self.render(request);
        let words: Vec<Result<String, ProviderError>> = content
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }
}
