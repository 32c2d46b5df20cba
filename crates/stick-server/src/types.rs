//! Request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stick_core::ai::Message;
use stick_core::tools::{ToolContext, ToolDefinition};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub agent: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub agent: String,
    pub count: usize,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub agent: String,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ToolExecuteRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub context: Option<ToolContext>,
}
