//! API routes

use axum::Router;

use crate::AppState;

mod chat;
mod history;
mod tools;

/// Build the agent router. The tool surface is mounted only for agents
/// with a non-empty tool allow-list.
pub fn agent_router(with_tools: bool) -> Router<AppState> {
    let router = Router::new()
        .nest("/chat", chat::router())
        .nest("/history", history::router());

    if with_tools {
        router.nest("/tools", tools::router())
    } else {
        router
    }
}
