//! Scripted provider for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;

use crate::error::ProviderError;
use crate::llm::{CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream};

/// What a [`MockProvider`] does when called.
pub(crate) enum MockBehavior {
    /// Every call succeeds with this content.
    Succeed(String),
    /// Every call fails with this reason.
    Fail(String),
    /// Streaming yields these chunks then ends cleanly. Buffered calls
    /// return the concatenation.
    StreamChunks(Vec<String>),
    /// Streaming yields these chunks then raises. Buffered calls fail.
    StreamChunksThenFail(Vec<String>, String),
}

pub(crate) struct MockProvider {
    name: String,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn response(&self, request: &CompletionRequest, content: String) -> CompletionResponse {
        CompletionResponse {
            content,
            tokens_used: 42,
            cost: Decimal::new(1, 3), // 0.001
            provider: self.name.clone(),
            model: request.model.clone(),
            metadata: serde_json::json!({}),
        }
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Succeed(content) => Ok(self.response(request, content.clone())),
            MockBehavior::StreamChunks(chunks) => Ok(self.response(request, chunks.concat())),
            MockBehavior::Fail(reason) | MockBehavior::StreamChunksThenFail(_, reason) => {
                Err(ProviderError::RequestFailed {
                    provider: self.name.clone(),
                    reason: reason.clone(),
                })
            }
        }
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Succeed(content) => {
                let items = vec![Ok(content.clone())];
                Ok(futures::stream::iter(items).boxed())
            }
            MockBehavior::StreamChunks(chunks) => {
                let items: Vec<Result<String, ProviderError>> =
                    chunks.iter().cloned().map(Ok).collect();
                Ok(futures::stream::iter(items).boxed())
            }
            MockBehavior::StreamChunksThenFail(chunks, reason) => {
                let mut items: Vec<Result<String, ProviderError>> =
                    chunks.iter().cloned().map(Ok).collect();
                items.push(Err(ProviderError::RequestFailed {
                    provider: self.name.clone(),
                    reason: reason.clone(),
                }));
                Ok(futures::stream::iter(items).boxed())
            }
            MockBehavior::Fail(reason) => Err(ProviderError::RequestFailed {
                provider: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}
