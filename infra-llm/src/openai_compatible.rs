use async_trait::async_trait;
use diarization_domain::{ChatModel, ChatRequest, DomainError};
use diarization_infra_common::{retry_with_backoff, RetryPolicy};
use futures::StreamExt;
use serde_json::json;

use crate::sse_stream::SseAccumulator;

/// One adapter instance per back-end (`remote`/`local`); `send_reasoning`
/// gates whether `reasoning.effort` is included in the request body, since
/// it is "only sent to remote back-ends" (§4.2).
pub struct OpenAiCompatibleAdapter {
    vendor: &'static str,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    send_reasoning: bool,
}

impl OpenAiCompatibleAdapter {
    pub fn remote(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            vendor: "llm-remote",
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: Some(api_key.into()),
            send_reasoning: true,
        }
    }

    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            vendor: "llm-local",
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            send_reasoning: false,
        }
    }

    async fn chat_once(&self, request: &ChatRequest) -> Result<String, DomainError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }
        if self.send_reasoning {
            if let Some(effort) = &request.reasoning_effort {
                body["reasoning"] = json!({ "effort": effort });
            }
        }

        let mut builder = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|err| DomainError::transient(self.vendor, err.to_string()))?;

        if response.status().is_server_error() || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DomainError::transient(self.vendor, format!("chat call failed with {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(DomainError::external_service_error(self.vendor, format!("chat call failed with {}", response.status())));
        }

        let mut accumulator = SseAccumulator::new(request.stop.clone().unwrap_or_default());
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| DomainError::transient(self.vendor, err.to_string()))?;
            let text = String::from_utf8_lossy(&chunk);
            if accumulator.feed(&text) {
                break;
            }
        }

        let reasoning_fallback = accumulator.reasoning().map(str::to_string);
        let content = accumulator.finish();
        if content.trim().is_empty() {
            return Err(DomainError::empty_content(self.vendor, reasoning_fallback));
        }
        Ok(content)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleAdapter {
    async fn chat(&self, request: ChatRequest) -> Result<String, DomainError> {
        retry_with_backoff(RetryPolicy::vendor_default(), self.vendor, || self.chat_once(&request)).await
    }
}
