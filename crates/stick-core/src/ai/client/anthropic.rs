//! Anthropic Messages API client

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{build_http_client, endpoint, pump_lines, send, send_streaming, StreamEvent};
use crate::ai::providers::{
    provider_turns, ChunkSink, LlmProvider, ProviderError, ProviderId, ProviderSettings,
};
use crate::ai::sse::sse_data;
use crate::ai::types::{LlmResponse, Message, Usage};
use crate::constants::ai;
use crate::error::ConfigError;

pub struct AnthropicClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl AnthropicClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            http: build_http_client()?,
            settings,
        })
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(endpoint(&self.settings.base_url, "v1/messages"))
            .header("anthropic-version", ai::ANTHROPIC_VERSION)
            .json(body);
        if let Some(key) = &self.settings.api_key {
            request = request.header("x-api-key", key);
        }
        request
    }
}

/// The system prompt travels in the top-level `system` field.
fn build_body(
    settings: &ProviderSettings,
    history: &[Message],
    system_prompt: Option<&str>,
    stream: bool,
) -> Value {
    let messages: Vec<Value> = provider_turns(history)
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();

    let mut body = json!({
        "model": settings.model,
        "max_tokens": settings.max_tokens,
        "temperature": settings.temperature,
        "messages": messages,
        "stream": stream,
    });
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        body["system"] = Value::String(system.to_string());
    }
    body
}

fn parse_response(json: &Value) -> LlmResponse {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default();

    let usage = json.get("usage").and_then(|u| {
        let input = u.get("input_tokens")?.as_u64()? as u32;
        let output = u.get("output_tokens")?.as_u64()? as u32;
        Some(Usage::new(input, output))
    });

    LlmResponse { content, usage }
}

fn decode_stream_line(line: &str) -> Result<StreamEvent, ProviderError> {
    let Some(data) = sse_data(line) else {
        return Ok(StreamEvent::Skip);
    };

    let json: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("Anthropic stream event: {}", e)))?;

    match json.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => {
            let delta = json.get("delta");
            let is_text = delta
                .and_then(|d| d.get("type"))
                .and_then(|t| t.as_str())
                == Some("text_delta");
            Ok(delta
                .filter(|_| is_text)
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str())
                .map(|t| StreamEvent::Text(t.to_string()))
                .unwrap_or(StreamEvent::Skip))
        }
        Some("message_stop") => Ok(StreamEvent::Done),
        Some("error") => Err(ProviderError::Api {
            status: 200,
            message: json
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("stream error")
                .to_string(),
        }),
        _ => Ok(StreamEvent::Skip),
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn generate(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        let body = build_body(&self.settings, history, system_prompt, false);
        let response = send(self.request(&body).timeout(ai::REQUEST_TIMEOUT)).await?;
        let json: Value = response.json().await?;
        Ok(parse_response(&json))
    }

    async fn stream(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<(), ProviderError> {
        let body = build_body(&self.settings, history, system_prompt, true);
        let response = send_streaming(self.request(&body), ai::REQUEST_TIMEOUT).await?;
        pump_lines(response, decode_stream_line, on_chunk).await
    }
}
