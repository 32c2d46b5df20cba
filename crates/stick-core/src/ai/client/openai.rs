//! OpenAI chat/completions client

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

pub struct OpenAiClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl OpenAiClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            http: build_http_client()?,
            settings,
        })
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(endpoint(&self.settings.base_url, "chat/completions"))
            .json(body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }
        request
    }
}

/// System prompt first as a `system` message, then the conversation.
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
        "temperature": settings.temperature,
        "max_tokens": settings.max_tokens,
        "stream": stream,
    })
}

fn parse_response(json: &Value) -> LlmResponse {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let usage = json.get("usage").and_then(|u| {
        let prompt = u.get("prompt_tokens")?.as_u64()? as u32;
        let completion = u.get("completion_tokens")?.as_u64()? as u32;
        let total = u
            .get("total_tokens")
            .and_then(|t| t.as_u64())
            .map(|t| t as u32)
            .unwrap_or(prompt + completion);
        Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        })
    });

    LlmResponse { content, usage }
}

fn decode_stream_line(line: &str) -> Result<StreamEvent, ProviderError> {
    let Some(data) = sse_data(line) else {
        return Ok(StreamEvent::Skip);
    };
    if data.trim() == "[DONE]" {
        return Ok(StreamEvent::Done);
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("OpenAI stream event: {}", e)))?;

    if let Some(message) = json.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(ProviderError::Api {
            status: 200,
            message: message.to_string(),
        });
    }

    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .map(|text| StreamEvent::Text(text.to_string()))
        .unwrap_or(StreamEvent::Skip))
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
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

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            model: "gpt-4o-mini".to_string(),
            api_key: Some("sk".to_string()),
            base_url: ai::OPENAI_BASE_URL.to_string(),
            temperature: 0.5,
            max_tokens: 256,
        }
    }

    #[test]
    fn body_puts_system_prompt_first() {
        let history = vec![Message::user("hi"), Message::agent("hello"), Message::user("?")];
        let body = build_body(&settings(), &history, Some("be nice"), true);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
    }

    #[test]
    fn parses_content_and_usage() {
        let json = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        });
        let response = parse_response(&json);
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.usage, Some(Usage::new(10, 3)));

        let bare = parse_response(&json!({"choices": [{"message": {"content": "x"}}]}));
        assert!(bare.usage.is_none());
    }

    #[test]
    fn decodes_stream_lines() {
        assert_eq!(
            decode_stream_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            StreamEvent::Text("Hel".to_string())
        );
        assert_eq!(
            decode_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamEvent::Skip
        );
        assert_eq!(decode_stream_line("data: [DONE]").unwrap(), StreamEvent::Done);
        assert_eq!(decode_stream_line(": keep-alive").unwrap(), StreamEvent::Skip);
        assert!(decode_stream_line("data: {not json").is_err());
    }
}
