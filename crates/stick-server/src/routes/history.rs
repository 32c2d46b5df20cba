//! Conversation history

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::types::HistoryResponse;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_history).delete(clear_history))
}

async fn get_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let runtime = state.runtime.lock().await;
    let messages = runtime.conversation_history().to_vec();
    Json(HistoryResponse {
        agent: state.agent_name().to_string(),
        count: messages.len(),
        messages,
    })
}

async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state.runtime.lock().await.clear_history();
    tracing::info!(agent = state.agent_name(), "Conversation history cleared");
    StatusCode::NO_CONTENT
}
