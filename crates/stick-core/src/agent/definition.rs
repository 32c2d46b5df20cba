//! Agent definitions and registry records
//!
//! An [`AgentDefinition`] is the user-authored JSON document. An
//! [`AgentRecord`] is the definition plus the lifecycle fields the registry
//! and process manager maintain.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::ai;

/// Declarative, user-authored description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Allow-list of tool names this agent may execute
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub environment: AgentEnvironment,
    #[serde(default, alias = "llmConfig", skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

impl AgentDefinition {
    /// Read a definition from a JSON file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent definition {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse agent definition {}", path.display()))
    }

    /// Whether `tool` is on this agent's allow-list
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Generation temperature, preferring the llm block over the environment
    pub fn temperature(&self) -> f32 {
        self.llm
            .as_ref()
            .and_then(|l| l.temperature)
            .unwrap_or(self.environment.temperature)
    }

    /// Output token budget, preferring the llm block over the environment
    pub fn max_tokens(&self) -> u32 {
        self.llm
            .as_ref()
            .and_then(|l| l.max_tokens)
            .unwrap_or(self.environment.max_tokens)
    }

    /// Whether the agent prefers streamed responses
    pub fn prefers_streaming(&self) -> bool {
        self.llm.as_ref().is_some_and(|l| l.stream)
    }
}

/// Generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEnvironment {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AgentEnvironment {
    fn default() -> Self {
        Self {
            max_tokens: ai::DEFAULT_MAX_TOKENS,
            temperature: ai::DEFAULT_TEMPERATURE,
        }
    }
}

fn default_max_tokens() -> u32 {
    ai::DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    ai::DEFAULT_TEMPERATURE
}

/// LLM provider selection. The provider tag is kept as written so that an
/// unknown tag can be reported when the adapter is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(
        default,
        rename = "baseURL",
        alias = "baseUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

/// Lifecycle status tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    #[default]
    Stopped,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A registered agent: its definition plus runtime bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    #[serde(flatten)]
    pub definition: AgentDefinition,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Fresh record for a newly registered definition
    pub fn stopped(definition: AgentDefinition) -> Self {
        Self {
            definition,
            status: AgentStatus::Stopped,
            port: None,
            pid: None,
            deployed_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }
}
