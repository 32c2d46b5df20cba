//! File operations tool - read, write, list, delete, and probe paths

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::tools::FILE_MAX_READ;
use crate::tools::registry::{
    normalize_path, parse_params, DangerLevel, ParameterType, Tool, ToolCategory, ToolContext,
    ToolDefinition, ToolError, ToolOutput, ToolParameter,
};

/// Sensitive locations; any path containing one of these is refused
const FORBIDDEN_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "/etc/gshadow",
    ".ssh/id_rsa",
    ".ssh/id_ed25519",
    ".ssh/id_ecdsa",
    ".ssh/id_dsa",
    ".aws/credentials",
    ".gnupg/",
];

const FORBIDDEN_MESSAGE: &str = "Access denied: forbidden path";

static DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "file-ops".to_string(),
    description: "Read, write, list, delete, or check files and directories".to_string(),
    category: ToolCategory::System,
    parameters: vec![
        ToolParameter::required(
            "operation",
            ParameterType::String,
            "One of: read, write, list, delete, exists",
        ),
        ToolParameter::required("path", ParameterType::String, "File or directory path"),
        ToolParameter::optional("content", ParameterType::String, "Content for write"),
    ],
    requires_permission: true,
    danger_level: DangerLevel::Medium,
});

pub struct FileOpsTool;

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Read,
    Write,
    List,
    Delete,
    Exists,
}

#[derive(Deserialize)]
struct Params {
    operation: String,
    path: String,
    #[serde(default)]
    content: Option<String>,
}

/// Whether the raw or resolved path touches a forbidden location
pub fn is_forbidden_path(raw: &str, resolved: &Path) -> bool {
    let normalized = normalize_path(resolved);
    let candidates = [
        raw.replace('\\', "/"),
        normalized.to_string_lossy().replace('\\', "/"),
    ];
    candidates.iter().any(|candidate| {
        FORBIDDEN_PATHS
            .iter()
            .any(|forbidden| candidate.contains(forbidden))
    })
}

fn modified_rfc3339(metadata: &std::fs::Metadata) -> Option<String> {
    metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

async fn read_file(path: &Path) -> Result<Value, ToolError> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_dir() {
        return Err(ToolError::failed("Path is a directory, not a file"));
    }
    if metadata.len() > FILE_MAX_READ {
        return Err(ToolError::failed("File too large to read"));
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(json!({
        "content": String::from_utf8_lossy(&bytes),
        "size": metadata.len(),
        "modified": modified_rfc3339(&metadata),
    }))
}

async fn write_file(path: &Path, content: &str) -> Result<Value, ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(json!({
        "message": "File written successfully",
        "path": path.display().to_string(),
        "size": content.len(),
    }))
}

async fn list_dir(path: &Path) -> Result<Value, ToolError> {
    let mut reader = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let metadata = entry.metadata().await.ok();
        let kind = match &metadata {
            Some(m) if m.is_dir() => "directory",
            Some(_) => "file",
            None => "unknown",
        };
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "type": kind,
            "size": metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            "modified": metadata.as_ref().and_then(modified_rfc3339),
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Ok(json!({
        "path": path.display().to_string(),
        "count": entries.len(),
        "entries": entries,
    }))
}

async fn delete_path(path: &Path) -> Result<Value, ToolError> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(json!({
        "message": "Deleted successfully",
        "path": path.display().to_string(),
    }))
}

async fn path_exists(path: &Path) -> Value {
    let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
    json!({
        "exists": exists,
        "path": path.display().to_string(),
    })
}

#[async_trait]
impl Tool for FileOpsTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: Params = parse_params(params)?;
        let operation: Operation = serde_json::from_value(Value::String(params.operation.clone()))
            .map_err(|_| {
                ToolError::Validation(format!("Unknown operation: {}", params.operation))
            })?;

        let path: PathBuf = ctx.resolve_path(&params.path);
        if is_forbidden_path(&params.path, &path) {
            tracing::warn!(path = %params.path, "Refused access to forbidden path");
            return Err(ToolError::PermissionDenied(FORBIDDEN_MESSAGE.to_string()));
        }

        let output = match operation {
            Operation::Read => read_file(&path).await?,
            Operation::Write => {
                let content = params.content.as_deref().ok_or_else(|| {
                    ToolError::Validation("Content is required for write operation".to_string())
                })?;
                write_file(&path, content).await?
            }
            Operation::List => list_dir(&path).await?,
            Operation::Delete => delete_path(&path).await?,
            Operation::Exists => path_exists(&path).await,
        };

        Ok(ToolOutput::new(output).with_metadata(json!({
            "operation": params.operation,
            "path": path.display().to_string(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::new().with_working_directory(dir)
    }

    #[tokio::test]
    async fn write_read_list_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());

        let written = FileOpsTool
            .execute(
                json!({"operation": "write", "path": "notes/a.txt", "content": "hello"}),
                &ctx,
            )
            .await;
        assert!(written.success, "{:?}", written.error);
        assert_eq!(written.output.as_ref().unwrap()["size"], 5);

        let read = FileOpsTool
            .execute(json!({"operation": "read", "path": "notes/a.txt"}), &ctx)
            .await;
        assert_eq!(read.output.unwrap()["content"], "hello");

        let listed = FileOpsTool
            .execute(json!({"operation": "list", "path": "notes"}), &ctx)
            .await;
        let output = listed.output.unwrap();
        assert_eq!(output["count"], 1);
        assert_eq!(output["entries"][0]["name"], "a.txt");
        assert_eq!(output["entries"][0]["type"], "file");

        let deleted = FileOpsTool
            .execute(json!({"operation": "delete", "path": "notes"}), &ctx)
            .await;
        assert!(deleted.success);

        let exists = FileOpsTool
            .execute(json!({"operation": "exists", "path": "notes/a.txt"}), &ctx)
            .await;
        assert_eq!(exists.output.unwrap()["exists"], false);
    }

    #[tokio::test]
    async fn forbidden_paths_are_denied_regardless_of_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        for path in [
            "/etc/passwd",
            "/etc/shadow",
            "../../../../../../etc/passwd",
            "~/.ssh/id_rsa",
            "/home/someone/.ssh/id_ed25519",
        ] {
            let result = FileOpsTool
                .execute(json!({"operation": "read", "path": path}), &ctx)
                .await;
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some(FORBIDDEN_MESSAGE), "{}", path);
        }

        let result = FileOpsTool
            .execute(
                json!({"operation": "write", "path": "/etc/sudoers", "content": "x"}),
                &ctx,
            )
            .await;
        assert_eq!(result.error.as_deref(), Some(FORBIDDEN_MESSAGE));
    }

    #[tokio::test]
    async fn unknown_operation_and_missing_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());

        let result = FileOpsTool
            .execute(json!({"operation": "chmod", "path": "a"}), &ctx)
            .await;
        assert_eq!(result.error.as_deref(), Some("Unknown operation: chmod"));

        let result = FileOpsTool
            .execute(json!({"operation": "write", "path": "a"}), &ctx)
            .await;
        assert!(result.error.unwrap().contains("Content is required"));
    }

    #[tokio::test]
    async fn reading_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileOpsTool
            .execute(
                json!({"operation": "read", "path": "nope.txt"}),
                &ctx(dir.path()),
            )
            .await;
        assert!(!result.success);
        assert!(result.execution_time < 5_000);
    }
}
