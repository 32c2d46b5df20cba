//! Tool listing and execution

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};

use stick_core::tools::ToolExecutionResult;

use crate::error::AppError;
use crate::types::{ToolExecuteRequest, ToolListResponse};
use crate::AppState;

/// Build the tools router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tools))
        .route("/execute", post(execute_tool))
}

/// Tools on the agent's allow-list
async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state.runtime.lock().await.available_tools();
    Json(ToolListResponse {
        agent: state.agent_name().to_string(),
        tools,
    })
}

/// Execute a tool. Gate and tool failures are reported in the result body.
async fn execute_tool(
    State(state): State<AppState>,
    body: Result<Json<ToolExecuteRequest>, JsonRejection>,
) -> Result<Json<ToolExecutionResult>, AppError> {
    let Json(req) = body?;
    let runtime = state.runtime.lock().await;
    let result = runtime
        .execute_tool(&req.tool, req.params, req.context.as_ref())
        .await;
    Ok(Json(result))
}
