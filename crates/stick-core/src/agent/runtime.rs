//! Agent runtime - one conversation, one provider, one allow-listed tool set
//!
//! The runtime owns its conversation history; callers only read or clear it.
//! Turns take `&mut self`, so overlapping turns on one instance are ruled out
//! by the borrow checker. A server sharing a runtime must put it behind a
//! lock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::definition::AgentDefinition;
use super::fallback::fallback_reply;
use crate::ai::{create_provider, ChunkSink, LlmProvider, Message, StreamChunk};
use crate::tools::{ToolContext, ToolDefinition, ToolExecutionResult, ToolRegistry};

const TOOLS_NOT_ENABLED: &str = "tools not enabled";
const TOOL_NOT_ALLOWED: &str = "not allowed";

pub struct AgentRuntime {
    definition: AgentDefinition,
    history: Vec<Message>,
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Arc<ToolRegistry>,
}

impl AgentRuntime {
    /// Build a runtime for `definition`. If the provider can't be constructed
    /// the failure is logged and the runtime answers with fallback replies.
    pub fn new(definition: AgentDefinition, tools: Arc<ToolRegistry>) -> Self {
        let provider = match create_provider(&definition) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(
                    agent = %definition.name,
                    error = %e,
                    "LLM provider unavailable, using fallback responses"
                );
                None
            }
        };
        if let Some(provider) = &provider {
            tracing::info!(
                agent = %definition.name,
                provider = %provider.id(),
                model = provider.model(),
                "LLM provider ready"
            );
        }
        Self::with_provider(definition, tools, provider)
    }

    /// Build a runtime with an explicit provider (or none).
    pub fn with_provider(
        definition: AgentDefinition,
        tools: Arc<ToolRegistry>,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            definition,
            history: Vec::new(),
            provider,
            tools,
        }
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn tools_enabled(&self) -> bool {
        self.definition.has_tools()
    }

    pub fn conversation_history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn system_prompt(&self) -> Option<&str> {
        Some(self.definition.instructions.as_str()).filter(|s| !s.trim().is_empty())
    }

    /// Handle one user turn and return the reply. Provider failures become
    /// the reply text; history advances either way.
    pub async fn process_message(&mut self, input: &str) -> String {
        self.history.push(Message::user(input));

        let reply = match self.provider.clone() {
            Some(provider) => {
                match provider.generate(&self.history, self.system_prompt()).await {
                    Ok(response) => {
                        if let Some(usage) = response.usage {
                            tracing::debug!(
                                agent = %self.definition.name,
                                prompt_tokens = usage.prompt_tokens,
                                completion_tokens = usage.completion_tokens,
                                "Generated reply"
                            );
                        }
                        response.content
                    }
                    Err(e) => {
                        tracing::error!(agent = %self.definition.name, error = %e, "LLM request failed");
                        error_reply(&e)
                    }
                }
            }
            None => fallback_reply(&self.definition, input, self.history.len()),
        };

        self.history.push(Message::agent(reply.clone()));
        reply
    }

    /// Like [`process_message`](Self::process_message), delivering the reply
    /// through `on_chunk` as it arrives. The stored agent message is the
    /// concatenation of all fragments; on failure it is the error text, which
    /// is also sent as the last fragment before the terminal chunk.
    pub async fn process_message_stream(
        &mut self,
        input: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> String {
        self.history.push(Message::user(input));

        let reply = match self.provider.clone() {
            Some(provider) => {
                let mut collected = String::new();
                let mut terminated = false;
                let result = {
                    let mut forward = |chunk: StreamChunk| {
                        if chunk.done {
                            terminated = true;
                        } else {
                            collected.push_str(&chunk.content);
                        }
                        on_chunk(chunk);
                    };
                    provider
                        .stream(&self.history, self.system_prompt(), &mut forward)
                        .await
                };

                match result {
                    Ok(()) => {
                        if !terminated {
                            on_chunk(StreamChunk::done());
                        }
                        collected
                    }
                    Err(e) => {
                        tracing::error!(agent = %self.definition.name, error = %e, "LLM stream failed");
                        let message = error_reply(&e);
                        if !terminated {
                            on_chunk(StreamChunk::text(message.clone()));
                            on_chunk(StreamChunk::done());
                        }
                        message
                    }
                }
            }
            None => {
                let reply = fallback_reply(&self.definition, input, self.history.len());
                on_chunk(StreamChunk::text(reply.clone()));
                on_chunk(StreamChunk::done());
                reply
            }
        };

        self.history.push(Message::agent(reply.clone()));
        reply
    }

    /// Registered tools this agent is allowed to use
    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .list()
            .into_iter()
            .filter(|def| self.definition.allows_tool(&def.name))
            .collect()
    }

    /// Run a tool on the agent's behalf, subject to its allow-list.
    pub async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        ctx: Option<&ToolContext>,
    ) -> ToolExecutionResult {
        if !self.tools_enabled() {
            return ToolExecutionResult::failure(TOOLS_NOT_ENABLED, 0);
        }
        if !self.definition.allows_tool(name) {
            tracing::warn!(agent = %self.definition.name, tool = name, "Tool not on allow-list");
            return ToolExecutionResult::failure(TOOL_NOT_ALLOWED, 0);
        }
        if !self.tools.has(name) {
            return ToolExecutionResult::failure(format!("Unknown tool: {}", name), 0);
        }

        let default_ctx = ToolContext::new();
        let ctx = ctx.unwrap_or(&default_ctx);
        let started = std::time::Instant::now();
        match AssertUnwindSafe(self.tools.execute(name, params, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Tool execution panicked".to_string());
                tracing::error!(tool = name, error = %message, "Tool panicked");
                ToolExecutionResult::failure(message, started.elapsed().as_millis() as u64)
            }
        }
    }
}

fn error_reply(e: &crate::ai::ProviderError) -> String {
    format!("Error generating response: {}", e)
}
