//! Tool registry and execution contract
//!
//! Tools declare a static [`ToolDefinition`]. Parameters are checked against
//! that declaration before a tool runs, every execution is timed, and all
//! failures come back as a [`ToolExecutionResult`] value rather than an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ConfigError;

/// Broad grouping used for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    System,
    Web,
    Data,
    Ai,
    Communication,
    Development,
}

/// How much damage a tool can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
    Safe,
    Low,
    Medium,
    High,
}

/// Declared JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Any JSON value
    Any,
}

impl ParameterType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Object => value.is_object(),
            ParameterType::Array => value.is_array(),
            ParameterType::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
            ParameterType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: ParameterType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParameterType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Static metadata describing a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<ToolParameter>,
    pub requires_permission: bool,
    pub danger_level: DangerLevel,
}

/// Per-call execution settings. Every field falls back to the tool's own
/// default when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Milliseconds
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_size: Option<usize>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_max_output_size(mut self, bytes: usize) -> Self {
        self.max_output_size = Some(bytes);
        self
    }

    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn max_output_or(&self, default: usize) -> usize {
        self.max_output_size.unwrap_or(default)
    }

    /// Working directory, or the process's current directory
    pub fn working_dir(&self) -> PathBuf {
        self.working_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path relative to the working directory (absolute paths and
    /// `~` pass through expanded)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = expand_home(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.working_dir().join(expanded)
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Outcome of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds
    pub execution_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolExecutionResult {
    pub fn failure(error: impl Into<String>, execution_time: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time,
            metadata: None,
        }
    }
}

/// Successful tool output
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub output: Value,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Why a tool did not succeed
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Command timed out after {0} ms")]
    Timeout(u128),

    #[error("{0}")]
    OutputTooLarge(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A failure that still produced partial output worth returning
    #[error("{message}")]
    Failed {
        message: String,
        output: Option<Value>,
        metadata: Option<Value>,
    },
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed {
            message: message.into(),
            output: None,
            metadata: None,
        }
    }
}

/// Parse tool parameters into a typed struct
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params)
        .map_err(|e| ToolError::Validation(format!("Invalid parameters: {}", e)))
}

/// Check `params` against a tool's declared parameter list.
pub fn validate_params(definition: &ToolDefinition, params: &Value) -> Result<(), ToolError> {
    let empty = serde_json::Map::new();
    let object = match params {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ToolError::Validation(
                "Parameters must be a JSON object".to_string(),
            ))
        }
    };

    for param in &definition.parameters {
        match object.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(ToolError::Validation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
            None | Some(Value::Null) => {}
            Some(value) if !param.param_type.matches(value) => {
                return Err(ToolError::Validation(format!(
                    "Parameter '{}' must be of type {}",
                    param.name,
                    param.param_type.as_str()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    /// Tool-specific work. Parameters have already been validated.
    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;

    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Validate, run, and time the tool. Never fails; problems are reported
    /// in the returned result.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolExecutionResult {
        let start = Instant::now();
        let outcome = match validate_params(self.definition(), &params) {
            Ok(()) => self.run(params, ctx).await,
            Err(e) => Err(e),
        };
        let execution_time = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(out) => ToolExecutionResult {
                success: true,
                output: Some(out.output),
                error: None,
                execution_time,
                metadata: out.metadata,
            },
            Err(ToolError::Failed {
                message,
                output,
                metadata,
            }) => ToolExecutionResult {
                success: false,
                output,
                error: Some(message),
                execution_time,
                metadata,
            },
            Err(e) => ToolExecutionResult::failure(e.to_string(), execution_time),
        }
    }
}

/// Registry of available tools, populated once at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool with the same name is rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ConfigError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ConfigError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool definitions, ordered by name
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition().clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolExecutionResult {
        let Some(tool) = self.get(name) else {
            return ToolExecutionResult::failure(format!("Unknown tool: {}", name), 0);
        };
        tracing::info!(tool = name, "Executing tool");
        let result = tool.execute(params, ctx).await;
        if !result.success {
            tracing::warn!(
                tool = name,
                error = result.error.as_deref().unwrap_or_default(),
                "Tool execution failed"
            );
        }
        result
    }
}

/// Lexically normalize a path (`.` and `..` folded, no filesystem access)
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        definition: ToolDefinition,
    }

    impl EchoTool {
        fn new(name: &str) -> Self {
            Self {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: "Echo the text back".to_string(),
                    category: ToolCategory::Data,
                    parameters: vec![
                        ToolParameter::required("text", ParameterType::String, "Text to echo"),
                        ToolParameter::optional("times", ParameterType::Number, "Repeat count"),
                    ],
                    requires_permission: false,
                    danger_level: DangerLevel::Safe,
                },
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn run(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            #[derive(Deserialize)]
            struct Params {
                text: String,
            }
            let p: Params = parse_params(params)?;
            Ok(ToolOutput::new(json!(p.text)).with_metadata(json!({"echoed": true})))
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("echo"))).unwrap();
        let err = registry
            .register(Arc::new(EchoTool::new("echo")))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn catalog_operations() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("b"))).unwrap();
        registry.register(Arc::new(EchoTool::new("a"))).unwrap();

        assert!(registry.has("a"));
        assert!(registry.get("missing").is_none());
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["a", "b"]);

        assert!(registry.unregister("a"));
        assert!(!registry.has("a"));
    }

    #[tokio::test]
    async fn executes_and_reports_metadata() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("echo"))).unwrap();

        let result = registry
            .execute("echo", json!({"text": "hi"}), &ToolContext::new())
            .await;
        assert!(result.success);
        assert_eq!(result.output, Some(json!("hi")));
        assert_eq!(result.metadata, Some(json!({"echoed": true})));
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_before_running() {
        let tool = EchoTool::new("echo");
        let result = tool.execute(json!({}), &ToolContext::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Missing required parameter: text")
        );
    }

    #[tokio::test]
    async fn wrong_type_fails_validation() {
        let tool = EchoTool::new("echo");
        let result = tool
            .execute(json!({"text": "x", "times": "three"}), &ToolContext::new())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("must be of type number"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("nonexistent", json!({}), &ToolContext::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool: nonexistent"));
    }

    #[test]
    fn context_deserializes_wire_names() {
        let ctx: ToolContext = serde_json::from_value(json!({
            "workingDirectory": "/tmp",
            "timeout": 1500,
            "maxOutputSize": 10,
            "environment": {"A": "1"}
        }))
        .unwrap();
        assert_eq!(ctx.timeout_or(Duration::from_secs(30)), Duration::from_millis(1500));
        assert_eq!(ctx.max_output_or(99), 10);
        assert_eq!(ctx.resolve_path("x.txt"), PathBuf::from("/tmp/x.txt"));
        assert_eq!(ctx.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn normalizes_lexically() {
        assert_eq!(
            normalize_path(Path::new("/srv/app/../../etc/./passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = ToolExecutionResult::failure("nope", 5);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"success": false, "error": "nope", "executionTime": 5}));
    }
}
