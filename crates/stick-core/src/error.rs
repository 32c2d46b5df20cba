//! Error types shared across the core library
//!
//! Tool failures live in [`crate::tools::ToolError`] and provider failures in
//! [`crate::ai::ProviderError`]; they are reported as values, not propagated.

use thiserror::Error;

/// Configuration problems detected at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid agent name '{0}': use lowercase letters, numbers, and hyphens only")]
    InvalidAgentName(String),

    #[error("Agent version is required")]
    MissingVersion,

    #[error("{provider} API key not provided (set it in the llm block or via {env})")]
    MissingApiKey {
        provider: &'static str,
        env: &'static str,
    },

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Invalid agent definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failures starting or stopping an agent server process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Agent '{name}' is already running (PID {pid})")]
    AlreadyRunning { name: String, pid: u32 },

    #[error("Agent server binary not found (looked for '{0}'); set STICK_AGENT_SERVER_BIN")]
    ServerBinaryNotFound(String),

    #[error("Failed to spawn agent server for '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
