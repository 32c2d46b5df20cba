//! LLM provider adapters
//!
//! A uniform generate/stream interface over OpenAI, Anthropic, and Ollama.

pub mod client;
pub mod providers;
pub mod sse;
pub mod types;

pub use providers::{
    create_provider, create_provider_with_env, ChunkSink, LlmProvider, ProviderError, ProviderId,
    ProviderSettings,
};
pub use types::{LlmResponse, Message, Role, StreamChunk, Usage};
