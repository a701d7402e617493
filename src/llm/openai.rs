//! OpenAI Chat Completions adapter.

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::ProviderError;
use crate::llm::sse::SseLineBuffer;
use crate::llm::{
    CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream, completion_cost,
};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI backend over the Chat Completions API. Also speaks to any
/// OpenAI-compatible endpoint via `with_base_url`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: String,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: API_URL.to_string(),
        }
    }

    /// Point the adapter at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: "openai".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("HTTP {status}: {detail}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(request, false).await?;
        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "openai".to_string(),
                    reason: e.to_string(),
                })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: "openai".to_string(),
                reason: "response contained no choices".to_string(),
            })?;

        let tokens_used = parsed.usage.prompt_tokens + parsed.usage.completion_tokens;
        let cost = completion_cost(
            &parsed.model,
            parsed.usage.prompt_tokens,
            parsed.usage.completion_tokens,
        );
        debug!(model = %parsed.model, tokens = tokens_used, "OpenAI completion");

        Ok(CompletionResponse {
            content,
            tokens_used,
            cost,
            provider: "openai".to_string(),
            model: parsed.model,
            metadata: serde_json::json!({
                "input_tokens": parsed.usage.prompt_tokens,
                "output_tokens": parsed.usage.completion_tokens,
            }),
        })
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let response = self.send(request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, ProviderError>>(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = SseLineBuffer::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::RequestFailed {
                                provider: "openai".to_string(),
                                reason: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                };

                for payload in buffer.push(&String::from_utf8_lossy(&chunk)) {
                    if payload == "[DONE]" {
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                        continue;
                    };
                    if let Some(text) = event["choices"][0]["delta"]["content"].as_str() {
                        if tx.send(Ok(text.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
