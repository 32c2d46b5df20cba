//! Subcommand implementations

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use stick_core::agent::{
    validate_definition, AgentDefinition, AgentRecord, AgentRegistry, AgentRuntime,
    ValidationReport,
};
use stick_core::ai::sse::{sse_data, LineBuffer};
use stick_core::constants::server::{DEFAULT_HOST, READINESS_TIMEOUT};
use stick_core::constants::storage::PROJECT_DEFINITION_FILE;
use stick_core::paths;
use stick_core::process::{wait_until_ready, ProcessManager, ServerProcessHandle};
use stick_core::tools::builtin_registry;
use stick_core::ProcessError;

/// A directory resolves to its `config/agent.json`; a file is used as is.
fn resolve_definition_path(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let resolved = if path.is_dir() {
        paths::project_definition_path(&path)
    } else {
        path
    };
    if !resolved.is_file() {
        bail!(
            "No agent definition found at {} (expected {} in the project directory)",
            resolved.display(),
            PROJECT_DEFINITION_FILE
        );
    }
    Ok(resolved)
}

/// Project root for a definition file at `<project>/config/agent.json`
fn project_dir(definition_path: &Path) -> PathBuf {
    let parent = definition_path.parent().unwrap_or(Path::new("."));
    let root = if parent.file_name().is_some_and(|n| n == "config") {
        parent.parent().unwrap_or(parent)
    } else {
        parent
    };
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

fn print_report(report: &ValidationReport) {
    for error in &report.errors {
        println!("  ✗ {}", error);
    }
    for warning in &report.warnings {
        println!("  ! {}", warning);
    }
}

/// Read, validate, and parse a definition. An invalid report is an error.
fn load_definition(path: &Path) -> Result<(AgentDefinition, ValidationReport)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let report = validate_definition(&raw);
    if !report.valid {
        print_report(&report);
        bail!("Agent definition {} is invalid", path.display());
    }
    let definition: AgentDefinition = serde_json::from_value(raw)
        .with_context(|| format!("Failed to parse agent definition {}", path.display()))?;
    Ok((definition, report))
}

pub fn validate(path: Option<PathBuf>) -> Result<()> {
    let path = resolve_definition_path(path)?;
    let (definition, report) = load_definition(&path)?;
    print_report(&report);
    println!(
        "✓ {} v{} is valid ({} warning{})",
        definition.name,
        definition.version,
        report.warnings.len(),
        if report.warnings.len() == 1 { "" } else { "s" }
    );
    Ok(())
}

/// Resolve, load, and validate the definition for a project path.
fn load_project(path: Option<PathBuf>) -> Result<(PathBuf, AgentDefinition, ValidationReport)> {
    let path = resolve_definition_path(path)?;
    let (definition, report) = load_definition(&path)?;
    Ok((path, definition, report))
}

fn register_from(registry: &AgentRegistry, path: Option<PathBuf>) -> Result<AgentRecord> {
    let (path, definition, report) = load_project(path)?;
    print_report(&report);
    registry.register_agent(&definition, &project_dir(&path))
}

pub fn register(path: Option<PathBuf>) -> Result<()> {
    let registry = AgentRegistry::new();
    let record = register_from(&registry, path)?;
    println!("✓ Registered agent \"{}\"", record.name());
    Ok(())
}

/// Register and start an agent. A live server is refused before the
/// registry is touched, so its record keeps the running pid and port.
fn start_deployment(
    manager: &ProcessManager,
    path: Option<PathBuf>,
    port: u16,
) -> Result<(String, ServerProcessHandle)> {
    let (path, definition, report) = load_project(path)?;
    if manager.is_server_running(&definition.name) {
        return Err(ProcessError::AlreadyRunning {
            pid: manager.read_pid(&definition.name).unwrap_or_default(),
            name: definition.name,
        }
        .into());
    }

    print_report(&report);
    let record = manager
        .registry()
        .register_agent(&definition, &project_dir(&path))?;
    let name = record.name().to_string();
    let handle = manager.start_server(&name, &record.definition, port)?;
    Ok((name, handle))
}

pub async fn deploy(path: Option<PathBuf>, port: u16) -> Result<()> {
    let manager = ProcessManager::new(AgentRegistry::new());
    let (name, handle) = start_deployment(&manager, path, port)?;
    println!("✓ Started \"{}\" (PID {})", name, handle.pid);

    if wait_until_ready(port, READINESS_TIMEOUT).await {
        println!("✓ Ready to serve requests");
    } else {
        println!(
            "! Server did not answer /health within {}s; check {}",
            READINESS_TIMEOUT.as_secs(),
            manager.log_path(&name).display()
        );
    }
    println!("\n  Local URL: http://localhost:{}\n", port);
    Ok(())
}

fn require_agent(registry: &AgentRegistry, name: &str) -> Result<AgentRecord> {
    match registry.get_agent(name)? {
        Some(record) => Ok(record),
        None => bail!("Agent \"{}\" not found. Run \"stick list\" to see available agents", name),
    }
}

pub fn stop(name: &str) -> Result<()> {
    let manager = ProcessManager::new(AgentRegistry::new());
    require_agent(manager.registry(), name)?;

    if !manager.is_server_running(name) {
        println!("Agent \"{}\" is not running", name);
        return Ok(());
    }
    manager.stop_server(name)?;
    println!("✓ Agent \"{}\" stopped", name);
    Ok(())
}

fn describe(record: &AgentRecord, running: bool) -> String {
    let mut lines = vec![format!(
        "{} {} [{}]",
        if running { "●" } else { "○" },
        record.name(),
        if running { "running" } else { "stopped" }
    )];
    if !record.definition.description.is_empty() {
        lines.push(format!("  {}", record.definition.description));
    }
    lines.push(format!("  Version: {}", record.definition.version));
    if running {
        if let Some(port) = record.port {
            lines.push(format!("  URL: http://localhost:{}", port));
        }
        if let Some(pid) = record.pid {
            lines.push(format!("  PID: {}", pid));
        }
    }
    if let Some(deployed_at) = record.deployed_at {
        lines.push(format!(
            "  Deployed: {}",
            deployed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    lines.join("\n")
}

pub fn list() -> Result<()> {
    let manager = ProcessManager::new(AgentRegistry::new());
    let agents = manager.registry().get_all_agents()?;
    if agents.is_empty() {
        println!("No agents registered yet.");
        println!("Run \"stick register\" or \"stick deploy\" in an agent project.");
        return Ok(());
    }

    println!("\nRegistered agents:\n");
    let mut running_count = 0;
    for record in &agents {
        let running = manager.is_server_running(record.name());
        if running {
            running_count += 1;
        }
        println!("{}\n", describe(record, running));
    }
    println!(
        "Total: {} ({} running, {} stopped)",
        agents.len(),
        running_count,
        agents.len() - running_count
    );
    Ok(())
}

#[derive(Deserialize)]
struct ChatReply {
    response: String,
}

async fn chat_over_http(port: u16, message: &str) -> Result<String> {
    let url = format!("http://{}:{}/chat", DEFAULT_HOST, port);
    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "message": message }))
        .send()
        .await
        .with_context(|| format!("Failed to reach agent at {}", url))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Agent returned {}: {}", status, body);
    }
    Ok(response.json::<ChatReply>().await?.response)
}

#[derive(Deserialize)]
struct StreamChunkEvent {
    content: String,
}

/// Consume `/chat/stream`, writing each `chunk` event to `out` as it arrives.
/// Returns the full response from the `done` event.
async fn chat_stream_over_http(
    port: u16,
    message: &str,
    out: &mut impl Write,
) -> Result<String> {
    let url = format!("http://{}:{}/chat/stream", DEFAULT_HOST, port);
    let mut response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "message": message }))
        .send()
        .await
        .with_context(|| format!("Failed to reach agent at {}", url))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Agent returned {}: {}", status, body);
    }

    let mut lines = LineBuffer::new();
    let mut event = String::new();
    let mut streamed = String::new();
    while let Some(bytes) = response.chunk().await? {
        for line in lines.push(&bytes) {
            if let Some(name) = line.strip_prefix("event:") {
                event = name.trim().to_string();
                continue;
            }
            let Some(data) = sse_data(&line) else {
                continue;
            };
            match event.as_str() {
                "chunk" => {
                    let chunk: StreamChunkEvent = serde_json::from_str(data)?;
                    write!(out, "{}", chunk.content)?;
                    out.flush()?;
                    streamed.push_str(&chunk.content);
                }
                "done" => return Ok(serde_json::from_str::<ChatReply>(data)?.response),
                _ => {}
            }
        }
    }
    tracing::debug!("Stream ended without a done event");
    Ok(streamed)
}

pub async fn run(name: &str, message: &str) -> Result<()> {
    let manager = ProcessManager::new(AgentRegistry::new());
    let record = require_agent(manager.registry(), name)?;

    let port = record.port.filter(|_| manager.is_server_running(name));
    if let (Some(port), true) = (port, record.definition.prefers_streaming()) {
        let mut stdout = std::io::stdout();
        chat_stream_over_http(port, message, &mut stdout).await?;
        println!();
        return Ok(());
    }

    let reply = match port {
        Some(port) => chat_over_http(port, message).await?,
        None => {
            tracing::debug!(agent = name, "Server not running, answering in-process");
            let definition = manager
                .registry()
                .get_metadata(name)?
                .map(|m| m.definition)
                .unwrap_or(record.definition);
            let tools = Arc::new(builtin_registry()?);
            let mut runtime = AgentRuntime::new(definition, tools);
            runtime.process_message(message).await
        }
    };

    println!("{}", reply);
    Ok(())
}

pub fn remove(name: &str) -> Result<()> {
    let manager = ProcessManager::new(AgentRegistry::new());
    require_agent(manager.registry(), name)?;

    if manager.is_server_running(name) {
        manager.stop_server(name)?;
        println!("✓ Stopped \"{}\"", name);
    }
    manager.registry().remove_agent(name)?;
    println!("✓ Removed agent \"{}\"", name);
    Ok(())
}
