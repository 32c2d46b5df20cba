//! Tool implementations
//!
//! Built-in tools:
//! - bash: Execute shell commands under a timeout and output cap
//! - file-ops: Read, write, list, delete, and probe paths
//! - http: Single HTTP request with host filtering
//! - json: Parse, stringify, query, and validate JSON

pub mod bash;
pub mod file_ops;
pub mod http;
pub mod json;

pub use bash::BashTool;
pub use file_ops::FileOpsTool;
pub use http::HttpTool;
pub use json::JsonTool;

use std::sync::Arc;

use crate::error::ConfigError;
use crate::tools::registry::ToolRegistry;

/// Register all built-in tools into `registry`
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), ConfigError> {
    registry.register(Arc::new(BashTool))?;
    registry.register(Arc::new(FileOpsTool))?;
    registry.register(Arc::new(HttpTool))?;
    registry.register(Arc::new(JsonTool))?;
    Ok(())
}

/// A fresh registry holding the built-in tools
pub fn builtin_registry() -> Result<ToolRegistry, ConfigError> {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_each_builtin_once() {
        let mut registry = builtin_registry().unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["bash", "file-ops", "http", "json"]);

        let err = register_builtin_tools(&mut registry).unwrap_err();
        assert_eq!(err.to_string(), "Tool 'bash' is already registered");
    }
}
