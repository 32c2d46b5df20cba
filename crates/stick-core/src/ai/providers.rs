//! LLM provider abstraction
//!
//! Each backend implements [`LlmProvider`]. [`create_provider`] is the single
//! construction point: it matches the configured tag, applies environment
//! fallbacks, and fails on anything it does not recognize.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::client::{AnthropicClient, OllamaClient, OpenAiClient};
use super::types::{LlmResponse, Message, Role, StreamChunk};
use crate::agent::AgentDefinition;
use crate::constants::ai;
use crate::error::ConfigError;

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl ProviderId {
    pub fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Ollama]
    }

    /// Tag used in agent definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => ai::OPENAI_DEFAULT_MODEL,
            ProviderId::Anthropic => ai::ANTHROPIC_DEFAULT_MODEL,
            ProviderId::Ollama => ai::OLLAMA_DEFAULT_MODEL,
        }
    }
}

impl FromStr for ProviderId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            "ollama" => Ok(ProviderId::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::OpenAi => write!(f, "OpenAI"),
            ProviderId::Anthropic => write!(f, "Anthropic"),
            ProviderId::Ollama => write!(f, "Ollama"),
        }
    }
}

/// Transient failures talking to a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("stream stalled for {0} seconds")]
    StreamTimeout(u64),
}

/// Resolved settings handed to a backend client.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Callback receiving streamed fragments
pub type ChunkSink<'a> = dyn FnMut(StreamChunk) + Send + 'a;

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn model(&self) -> &str;

    /// Produce one complete reply for the conversation so far.
    async fn generate(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, ProviderError>;

    /// Stream a reply. Text fragments are delivered in order, followed by
    /// exactly one terminal chunk (`done: true`, empty content) on success.
    async fn stream(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<(), ProviderError>;
}

/// Build the adapter an agent definition asks for.
///
/// Returns `Ok(None)` when the definition has no `llm` block or selects
/// `none`. Reads API keys and the Ollama host from the process environment
/// when the definition omits them.
pub fn create_provider(
    definition: &AgentDefinition,
) -> Result<Option<Arc<dyn LlmProvider>>, ConfigError> {
    create_provider_with_env(definition, |key| std::env::var(key).ok())
}

/// [`create_provider`] with an explicit environment lookup.
pub fn create_provider_with_env<F>(
    definition: &AgentDefinition,
    env: F,
) -> Result<Option<Arc<dyn LlmProvider>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(llm) = definition.llm.as_ref() else {
        return Ok(None);
    };
    if llm.provider == "none" {
        return Ok(None);
    }

    let id: ProviderId = llm.provider.parse()?;
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

    let model = non_empty(&llm.model).unwrap_or_else(|| id.default_model().to_string());
    let temperature = definition.temperature();
    let max_tokens = definition.max_tokens();

    let provider: Arc<dyn LlmProvider> = match id {
        ProviderId::OpenAi => {
            let api_key = non_empty(&llm.api_key)
                .or_else(|| env(ai::OPENAI_API_KEY_ENV))
                .ok_or(ConfigError::MissingApiKey {
                    provider: "OpenAI",
                    env: ai::OPENAI_API_KEY_ENV,
                })?;
            Arc::new(OpenAiClient::new(ProviderSettings {
                model,
                api_key: Some(api_key),
                base_url: non_empty(&llm.base_url)
                    .unwrap_or_else(|| ai::OPENAI_BASE_URL.to_string()),
                temperature,
                max_tokens,
            })?)
        }
        ProviderId::Anthropic => {
            let api_key = non_empty(&llm.api_key)
                .or_else(|| env(ai::ANTHROPIC_API_KEY_ENV))
                .ok_or(ConfigError::MissingApiKey {
                    provider: "Anthropic",
                    env: ai::ANTHROPIC_API_KEY_ENV,
                })?;
            Arc::new(AnthropicClient::new(ProviderSettings {
                model,
                api_key: Some(api_key),
                base_url: non_empty(&llm.base_url)
                    .unwrap_or_else(|| ai::ANTHROPIC_BASE_URL.to_string()),
                temperature,
                max_tokens,
            })?)
        }
        ProviderId::Ollama => Arc::new(OllamaClient::new(ProviderSettings {
            model,
            api_key: None,
            base_url: non_empty(&llm.base_url)
                .or_else(|| env(ai::OLLAMA_HOST_ENV))
                .unwrap_or_else(|| ai::OLLAMA_DEFAULT_HOST.to_string()),
            temperature,
            max_tokens,
        })?),
    };

    tracing::info!(
        agent = %definition.name,
        provider = %id,
        model = provider.model(),
        "LLM provider configured"
    );
    Ok(Some(provider))
}

/// Conversation turns forwarded to providers: user and agent messages only,
/// with `agent` mapped to the wire role `assistant`.
pub(crate) fn provider_turns(history: &[Message]) -> Vec<(&'static str, &str)> {
    history
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(("user", m.content.as_str())),
            Role::Agent => Some(("assistant", m.content.as_str())),
            Role::System => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(llm: serde_json::Value) -> AgentDefinition {
        serde_json::from_value(json!({"name": "demo", "version": "1.0.0", "llm": llm})).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parses_known_tags_only() {
        for id in ProviderId::all() {
            assert_eq!(id.as_str().parse::<ProviderId>().unwrap(), *id);
        }
        let err = "gemini".parse::<ProviderId>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported LLM provider: gemini");
    }

    #[test]
    fn unknown_provider_fails_construction() {
        let result = create_provider_with_env(&definition(json!({"provider": "gemini"})), no_env);
        assert!(matches!(result, Err(ConfigError::UnknownProvider(_))));
    }

    #[test]
    fn none_and_absent_mean_no_provider() {
        let def = definition(json!({"provider": "none"}));
        assert!(create_provider_with_env(&def, no_env).unwrap().is_none());

        let def: AgentDefinition =
            serde_json::from_value(json!({"name": "demo", "version": "1"})).unwrap();
        assert!(create_provider_with_env(&def, no_env).unwrap().is_none());
    }

    #[test]
    fn cloud_providers_need_a_key() {
        let result = create_provider_with_env(&definition(json!({"provider": "openai"})), no_env);
        assert!(matches!(result, Err(ConfigError::MissingApiKey { .. })));

        let provider = create_provider_with_env(&definition(json!({"provider": "openai"})), |k| {
            (k == "OPENAI_API_KEY").then(|| "sk-env".to_string())
        })
        .unwrap()
        .unwrap();
        assert_eq!(provider.id(), ProviderId::OpenAi);
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn ollama_needs_no_key_and_honours_model() {
        let provider = create_provider_with_env(
            &definition(json!({"provider": "ollama", "model": "mistral"})),
            no_env,
        )
        .unwrap()
        .unwrap();
        assert_eq!(provider.id(), ProviderId::Ollama);
        assert_eq!(provider.model(), "mistral");
    }

    #[test]
    fn turns_drop_system_and_rename_agent() {
        let history = vec![
            Message::new(Role::System, "ignored"),
            Message::user("hi"),
            Message::agent("hello"),
        ];
        assert_eq!(
            provider_turns(&history),
            vec![("user", "hi"), ("assistant", "hello")]
        );
    }
}
