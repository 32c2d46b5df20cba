//! Ollama `/api/chat` client (newline-delimited JSON when streaming)

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{build_http_client, endpoint, pump_lines, send, send_streaming, StreamEvent};
use crate::ai::providers::{
    provider_turns, ChunkSink, LlmProvider, ProviderError, ProviderId, ProviderSettings,
};
use crate::ai::types::{LlmResponse, Message, Usage};
use crate::constants::ai;
use crate::error::ConfigError;

pub struct OllamaClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl OllamaClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            http: build_http_client()?,
            settings,
        })
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.http
            .post(endpoint(&self.settings.base_url, "api/chat"))
            .json(body)
    }
}

fn build_body(
    settings: &ProviderSettings,
    history: &[Message],
    system_prompt: Option<&str>,
    stream: bool,
) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    for (role, content) in provider_turns(history) {
        messages.push(json!({"role": role, "content": content}));
    }

    json!({
        "model": settings.model,
        "messages": messages,
        "stream": stream,
        "options": {
            "temperature": settings.temperature,
            "num_predict": settings.max_tokens,
        },
    })
}

/// Usage is only reported when both counters are present.
fn parse_response(json: &Value) -> LlmResponse {
    let content = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let prompt = json.get("prompt_eval_count").and_then(|v| v.as_u64());
    let completion = json.get("eval_count").and_then(|v| v.as_u64());
    let usage = match (prompt, completion) {
        (Some(p), Some(c)) => Some(Usage::new(p as u32, c as u32)),
        _ => None,
    };

    LlmResponse { content, usage }
}

fn decode_stream_line(line: &str) -> Result<StreamEvent, ProviderError> {
    let json: Value = serde_json::from_str(line)
        .map_err(|e| ProviderError::Decode(format!("Ollama stream line: {}", e)))?;

    if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
        return Err(ProviderError::Api {
            status: 200,
            message: error.to_string(),
        });
    }

    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    if json.get("done").and_then(|d| d.as_bool()) == Some(true) {
        // The final object may still carry a trailing fragment
        return Ok(if text.is_empty() {
            StreamEvent::Done
        } else {
            StreamEvent::Text(text.to_string())
        });
    }
    Ok(StreamEvent::Text(text.to_string()))
}

#[async_trait]
impl LlmProvider for OllamaClient {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
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
