//! JSON tool - parse, stringify, query, and validate JSON data

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{
    parse_params, DangerLevel, ParameterType, Tool, ToolCategory, ToolContext, ToolDefinition,
    ToolError, ToolOutput, ToolParameter,
};

static DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "json".to_string(),
    description: "Parse, validate, and query JSON data".to_string(),
    category: ToolCategory::Data,
    parameters: vec![
        ToolParameter::required(
            "operation",
            ParameterType::String,
            "One of: parse, stringify, query, validate",
        ),
        ToolParameter::required("data", ParameterType::Any, "JSON string or value"),
        ToolParameter::optional(
            "path",
            ParameterType::String,
            "Dotted path for query, e.g. \"user.name\" or \"items.0.id\"",
        ),
    ],
    requires_permission: false,
    danger_level: DangerLevel::Safe,
});

pub struct JsonTool;

#[derive(Deserialize)]
struct Params {
    operation: String,
    data: Value,
    #[serde(default)]
    path: Option<String>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Strings are decoded; any other value is already JSON.
fn decode(data: &Value) -> Result<Value, serde_json::Error> {
    match data {
        Value::String(text) => serde_json::from_str(text),
        other => Ok(other.clone()),
    }
}

fn parse(data: &Value) -> Value {
    match decode(data) {
        Ok(parsed) => json!({
            "type": type_name(&parsed),
            "result": parsed,
            "valid": true,
        }),
        Err(e) => json!({
            "result": null,
            "valid": false,
            "error": e.to_string(),
        }),
    }
}

fn stringify(data: &Value) -> Result<Value, ToolError> {
    let text = serde_json::to_string_pretty(data)
        .map_err(|e| ToolError::failed(format!("Failed to stringify: {}", e)))?;
    Ok(json!({
        "size": text.len(),
        "result": text,
    }))
}

/// Walk a dotted path through objects and arrays.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn query(data: &Value, path: Option<&str>) -> Result<Value, ToolError> {
    let path = path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ToolError::failed("Path is required for query operation"))?;
    let root = decode(data).map_err(|e| ToolError::failed(format!("Query failed: {}", e)))?;

    Ok(match lookup(&root, path) {
        Some(found) => json!({ "result": found, "found": true, "path": path }),
        None => json!({ "result": null, "found": false, "path": path }),
    })
}

fn validate(data: &Value) -> Value {
    match decode(data) {
        Ok(_) => json!({ "valid": true, "message": "Valid JSON" }),
        Err(e) => json!({
            "valid": false,
            "message": "Invalid JSON",
            "error": e.to_string(),
        }),
    }
}

#[async_trait]
impl Tool for JsonTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn run(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: Params = parse_params(params)?;
        let operation = params.operation.to_ascii_lowercase();

        let output = match operation.as_str() {
            "parse" => parse(&params.data),
            "stringify" => stringify(&params.data)?,
            "query" => query(&params.data, params.path.as_deref())?,
            "validate" => validate(&params.data),
            other => {
                return Err(ToolError::Validation(format!("Unknown operation: {}", other)));
            }
        };

        Ok(ToolOutput::new(output).with_metadata(json!({ "operation": operation })))
    }
}
