//! Stick core library
//!
//! Agent registry, server process management, LLM provider adapters, the
//! sandboxed tool registry, and the agent runtime that ties them together.

pub mod agent;
pub mod ai;
pub mod constants;
pub mod error;
pub mod paths;
pub mod process;
pub mod tools;

pub use agent::{AgentDefinition, AgentRecord, AgentRegistry, AgentRuntime, AgentStatus};
pub use error::{ConfigError, ProcessError};
pub use process::{ProcessManager, ServerProcessHandle};
pub use tools::{builtin_registry, ToolRegistry};
