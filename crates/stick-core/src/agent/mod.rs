//! Agents: definitions, the persistent registry, and the conversation runtime
//!
//! - `AgentDefinition` / `AgentRecord` - user-authored config and its lifecycle fields
//! - `AgentRegistry` - `registry.json` plus per-agent metadata directories
//! - `AgentRuntime` - one conversation driven by an LLM provider or fallback rules
//! - `validate_definition` - pass/fail plus warnings for raw definition JSON

pub mod definition;
pub mod fallback;
pub mod registry;
pub mod runtime;
pub mod validation;

pub use definition::{AgentDefinition, AgentEnvironment, AgentRecord, AgentStatus, LlmConfig};
pub use registry::{AgentMetadata, AgentRegistry};
pub use runtime::AgentRuntime;
pub use validation::{is_valid_agent_name, validate_definition, ValidationReport};
