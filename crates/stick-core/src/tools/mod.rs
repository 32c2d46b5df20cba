//! Tool registry and sandboxed built-in tools

pub mod implementations;
pub mod registry;

pub use implementations::{builtin_registry, register_builtin_tools};
pub use registry::{
    normalize_path, parse_params, DangerLevel, ParameterType, Tool, ToolCategory, ToolContext,
    ToolDefinition, ToolError, ToolExecutionResult, ToolOutput, ToolParameter, ToolRegistry,
};
