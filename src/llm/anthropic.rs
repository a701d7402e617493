//! Anthropic Messages API adapter.

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

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic backend over the Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(ref system) = request.system_prompt {
            body["system"] = serde_json::Value::String(system.clone());
        }
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
            .post(API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("HTTP {status}: {detail}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(request, false).await?;
        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "anthropic".to_string(),
                    reason: e.to_string(),
                })?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();

        let tokens_used = parsed.usage.input_tokens + parsed.usage.output_tokens;
        let cost = completion_cost(
            &parsed.model,
            parsed.usage.input_tokens,
            parsed.usage.output_tokens,
        );
        debug!(model = %parsed.model, tokens = tokens_used, "Anthropic completion");

        Ok(CompletionResponse {
            content,
            tokens_used,
            cost,
            provider: "anthropic".to_string(),
            model: parsed.model,
            metadata: serde_json::json!({
                "input_tokens": parsed.usage.input_tokens,
                "output_tokens": parsed.usage.output_tokens,
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
                                provider: "anthropic".to_string(),
                                reason: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                };

                for payload in buffer.push(&String::from_utf8_lossy(&chunk)) {
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                        continue;
                    };
                    match event["type"].as_str() {
                        Some("content_block_delta") => {
                            if let Some(text) = event["delta"]["text"].as_str() {
                                if tx.send(Ok(text.to_string())).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some("message_stop") => return,
                        Some("error") => {
                            let reason = event["error"]["message"]
                                .as_str()
                                .unwrap_or("stream error")
                                .to_string();
                            let _ = tx
                                .send(Err(ProviderError::RequestFailed {
                                    provider: "anthropic".to_string(),
                                    reason,
                                }))
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
