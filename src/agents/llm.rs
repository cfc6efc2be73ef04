/// Language-model backend collaborator
///
/// Agents talk to the model through `LlmBackend`. The HTTP implementation targets an
/// OpenAI-compatible chat completion endpoint and enforces the request timeout
/// itself; the engine never times calls out on its own.

use crate::agents::types::ConversationTurn;
use crate::config::LlmConfig;
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered chunks between the producer and the consumer
const CHUNK_BUFFER: usize = 4;

/// One generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub history: Vec<ConversationTurn>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Optional retrieval source the answer should be grounded in
    pub retrieval_source: Option<String>,
}

/// Token accounting reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Backend reply; failures are data, not errors
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmResponse {
    pub success: bool,
    pub text: String,
    pub usage: Usage,
    pub error: Option<String>,
}

impl LlmResponse {
    pub fn ok(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            success: true,
            text: text.into(),
            usage,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync + 'static {
    /// Run one completion; transport errors and timeouts come back as a failed response
    async fn generate(&self, request: &LlmRequest) -> LlmResponse;

    async fn health_check(&self) -> bool;
}

/// Lazy, finite, non-restartable sequence of text chunks
///
/// Dropping the stream or calling `cancel` stops the producer at its next chunk.
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<String, String>>,
    cancel: CancellationToken,
}

impl ChunkStream {
    pub async fn next_chunk(&mut self) -> Option<Result<String, String>> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into the full text, stopping at the first error
    pub async fn collect_text(mut self) -> Result<String, String> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for ChunkStream {
    type Item = Result<String, String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Stream a generation as word-sized chunks over a cancellable channel
///
/// The producer only runs ahead of the consumer by `CHUNK_BUFFER` chunks.
pub fn stream_generation(
    backend: Arc<dyn LlmBackend>,
    request: LlmRequest,
    cancel: CancellationToken,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    let producer_cancel = cancel.clone();

    tokio::spawn(async move {
        let response = tokio::select! {
            _ = producer_cancel.cancelled() => return,
            response = backend.generate(&request) => response,
        };

        if !response.success {
            let error = response.error.unwrap_or_else(|| "generation failed".to_string());
            let _ = tx.send(Err(error)).await;
            return;
        }

        for chunk in response.text.split_inclusive(char::is_whitespace) {
            tokio::select! {
                _ = producer_cancel.cancelled() => {
                    tracing::debug!("🛑 Chunk stream cancelled by consumer");
                    return;
                }
                sent = tx.send(Ok(chunk.to_string())) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    });

    ChunkStream { rx, cancel }
}

/// OpenAI-compatible chat completion client
#[derive(Debug, Clone)]
pub struct HttpLlmBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpLlmBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build LLM HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn build_body(&self, request: &LlmRequest) -> Value {
        let mut system = request.system_prompt.clone();
        if let Some(source) = &request.retrieval_source {
            system.push_str(&format!("\n\nGround your answer in the retrieval source: {}", source));
        }

        let mut messages = vec![json!({ "role": "system", "content": system })];
        for turn in &request.history {
            messages.push(json!({ "role": turn.role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({ "model": self.model, "messages": messages });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    fn describe_transport_error(&self, e: &reqwest::Error) -> String {
        if e.is_timeout() {
            format!("request timed out after {:?}", self.timeout)
        } else if e.is_connect() {
            format!("connection failed: {}", e)
        } else {
            format!("request failed: {}", e)
        }
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn generate(&self, request: &LlmRequest) -> LlmResponse {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);
        tracing::debug!("🧠 LLM request to {} (model: {})", url, self.model);

        let response = match self.authorized(self.client.post(&url)).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return LlmResponse::failed(self.describe_transport_error(&e)),
        };

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) if status.is_success() => return LlmResponse::failed(self.describe_transport_error(&e)),
            Err(_) => Value::Null,
        };

        if !status.is_success() {
            let detail = payload
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("no error detail");
            return LlmResponse::failed(format!("HTTP {}: {}", status.as_u16(), detail));
        }

        let Some(text) = payload.pointer("/choices/0/message/content").and_then(|c| c.as_str()) else {
            return LlmResponse::failed("malformed completion response: missing choices[0].message.content");
        };

        let usage = payload
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default();

        LlmResponse::ok(text, usage)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("⚠️ LLM backend health check failed: {}", e);
                false
            }
        }
    }
}
