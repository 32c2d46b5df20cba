//! Chat endpoints: one-shot JSON and SSE streaming

use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use stick_core::ai::StreamChunk;

use crate::error::AppError;
use crate::types::{ChatRequest, ChatResponse};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(chat))
        .route("/stream", post(chat_stream))
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;

    let response = {
        let mut runtime = state.runtime.lock().await;
        runtime.process_message(&req.message).await
    };

    Ok(Json(ChatResponse {
        agent: state.agent_name().to_string(),
        response,
        timestamp: Utc::now(),
    }))
}

/// Stream a reply as SSE: `chunk` events carrying `{content}`, then one
/// `done` event carrying the full response.
async fn chat_stream(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(req) = body?;
    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

    let runtime = state.runtime.clone();
    let agent = state.agent_name().to_string();
    tokio::spawn(async move {
        let mut runtime = runtime.lock().await;

        let chunk_tx = tx.clone();
        let mut on_chunk = move |chunk: StreamChunk| {
            if chunk.done {
                return;
            }
            let data = json!({ "content": chunk.content }).to_string();
            let _ = chunk_tx.send(Ok(Event::default().event("chunk").data(data)));
        };
        let response = runtime
            .process_message_stream(&req.message, &mut on_chunk)
            .await;

        let data = json!({
            "agent": agent,
            "response": response,
            "timestamp": Utc::now(),
        })
        .to_string();
        let _ = tx.send(Ok(Event::default().event("done").data(data)));
    });

    Ok(Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}
