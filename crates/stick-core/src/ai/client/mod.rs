//! HTTP clients for each provider backend
//!
//! Request shaping and response decoding are pure functions per backend so
//! they can be exercised without a network; the shared plumbing below owns
//! transport, error mapping, and line framing.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use futures::StreamExt;
use serde_json::Value;

use super::providers::ProviderError;
use super::sse::LineBuffer;
use crate::constants::ai;
use crate::error::ConfigError;

/// Decoded meaning of one streamed line
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    Text(String),
    Done,
    Skip,
}

pub(crate) fn build_http_client() -> Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(ai::CONNECT_TIMEOUT)
        .build()?)
}

/// Send a request and turn non-success statuses into [`ProviderError::Api`].
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// [`send`] for a streamed reply. The body is bounded per chunk by
/// [`pump_lines`]; this bounds the wait for the response headers.
pub(crate) async fn send_streaming(
    request: reqwest::RequestBuilder,
    wait: std::time::Duration,
) -> Result<reqwest::Response, ProviderError> {
    tokio::time::timeout(wait, send(request))
        .await
        .map_err(|_| ProviderError::StreamTimeout(wait.as_secs()))?
}

/// Best-effort extraction of a provider error message
pub(crate) fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("message"))
        })
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Read a streamed body line by line, decoding each line with `decode` and
/// forwarding text. Emits the terminal chunk once the stream finishes,
/// whether the provider signalled the end or simply closed the body.
pub(crate) async fn pump_lines<D>(
    response: reqwest::Response,
    decode: D,
    on_chunk: &mut super::providers::ChunkSink<'_>,
) -> Result<(), ProviderError>
where
    D: Fn(&str) -> Result<StreamEvent, ProviderError>,
{
    let mut stream = response.bytes_stream();
    let mut lines = LineBuffer::new();

    'read: loop {
        let next = tokio::time::timeout(ai::STREAM_IDLE_TIMEOUT, stream.next())
            .await
            .map_err(|_| ProviderError::StreamTimeout(ai::STREAM_IDLE_TIMEOUT.as_secs()))?;

        let Some(chunk) = next else {
            if let Some(rest) = lines.finish() {
                if let StreamEvent::Text(text) = decode(&rest)? {
                    on_chunk(super::types::StreamChunk::text(text));
                }
            }
            break;
        };

        for line in lines.push(&chunk?) {
            if line.trim().is_empty() {
                continue;
            }
            match decode(&line)? {
                StreamEvent::Text(text) if !text.is_empty() => {
                    on_chunk(super::types::StreamChunk::text(text))
                }
                StreamEvent::Done => break 'read,
                _ => {}
            }
        }
    }

    on_chunk(super::types::StreamChunk::done());
    Ok(())
}

/// Join base URL and path without doubling slashes
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
