//! Stick agent server
//!
//! The boundary process that hosts exactly one agent runtime. The process
//! manager spawns it with `--config <definition.json> --port <n>`; it serves
//! HTTP until SIGTERM or Ctrl-C, then closes its listener and exits.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::Method,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use stick_core::agent::{AgentDefinition, AgentRecord, AgentRuntime, AgentStatus};
use stick_core::constants::server::{DEFAULT_HOST, DEFAULT_PORT, MAX_BODY_BYTES};
use stick_core::tools::ToolRegistry;

pub mod error;
pub mod routes;
pub mod types;

use error::AppError;
use types::HealthResponse;

/// Configuration for starting the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub definition: Arc<AgentDefinition>,
    /// One runtime per process. The lock serializes turns.
    pub runtime: Arc<Mutex<AgentRuntime>>,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(definition: AgentDefinition, tools: Arc<ToolRegistry>, port: u16) -> Self {
        let runtime = AgentRuntime::new(definition, tools);
        Self::with_runtime(runtime, port)
    }

    pub fn with_runtime(runtime: AgentRuntime, port: u16) -> Self {
        Self {
            definition: Arc::new(runtime.definition().clone()),
            runtime: Arc::new(Mutex::new(runtime)),
            port,
            started_at: Utc::now(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.definition.name
    }
}

/// Build the Axum router for one agent.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .merge(routes::agent_router(state.definition.has_tools()))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until a shutdown signal arrives.
pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let agent = state.agent_name().to_string();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(agent = %agent, "Agent server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(agent = %agent, "Agent server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        agent: state.agent_name().to_string(),
    })
}

/// The agent's definition plus this process's runtime fields. API keys are
/// masked.
async fn config(State(state): State<AppState>) -> Json<AgentRecord> {
    let mut definition = (*state.definition).clone();
    if let Some(llm) = definition.llm.as_mut() {
        if llm.api_key.is_some() {
            llm.api_key = Some("********".to_string());
        }
    }
    Json(AgentRecord {
        definition,
        status: AgentStatus::Running,
        port: Some(state.port),
        pid: Some(std::process::id()),
        deployed_at: Some(state.started_at),
    })
}

async fn not_found() -> AppError {
    AppError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(tools: &[&str]) -> AppState {
        let definition: AgentDefinition = serde_json::from_value(json!({
            "name": "demo",
            "version": "1.0.0",
            "description": "Demo agent",
            "tools": tools,
            "instructions": "Be helpful.",
            "llm": {"provider": "none", "apiKey": "secret"},
        }))
        .unwrap();
        let tools = Arc::new(stick_core::tools::builtin_registry().unwrap());
        AppState::new(definition, tools, 4321)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_config() {
        let app = build_router(state(&[]));

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy", "agent": "demo"}));

        let (status, body) = send(&app, get("/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "demo");
        assert_eq!(body["status"], "running");
        assert_eq!(body["port"], 4321);
        assert_eq!(body["llm"]["apiKey"], "********");
    }

    #[tokio::test]
    async fn chat_round_trip_and_history() {
        let app = build_router(state(&[]));

        let (status, body) = send(&app, post_json("/chat", r#"{"message":"hello"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agent"], "demo");
        assert!(body["response"].as_str().unwrap().contains("demo"));
        assert!(body["timestamp"].is_string());

        let (_, body) = send(&app, get("/history")).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "agent");

        let request = Request::builder()
            .method("DELETE")
            .uri("/history")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, get("/history")).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let app = build_router(state(&[]));

        let (status, body) = send(&app, post_json("/chat", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");
        assert!(body["message"].is_string());

        let (status, body) = send(&app, post_json("/chat", r#"{"msg":"x"}"#)).await;
        assert!(status.is_client_error());
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = build_router(state(&[]));
        let huge = format!(r#"{{"message":"{}"}}"#, "x".repeat(MAX_BODY_BYTES + 1));
        let (status, body) = send(&app, post_json("/chat", &huge)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(state(&[]));
        let (status, body) = send(&app, get("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Not found"}));
    }

    #[tokio::test]
    async fn tool_routes_only_with_tools() {
        let app = build_router(state(&[]));
        let (status, _) = send(&app, get("/tools")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let app = build_router(state(&["json"]));
        let (status, body) = send(&app, get("/tools")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tools"][0]["name"], "json");
        assert_eq!(body["tools"][0]["dangerLevel"], "safe");

        let (status, body) = send(
            &app,
            post_json(
                "/tools/execute",
                r#"{"tool":"json","params":{"operation":"validate","data":"[1]"}}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["output"]["valid"], true);

        let (_, body) = send(
            &app,
            post_json(
                "/tools/execute",
                r#"{"tool":"bash","params":{"command":"echo hi"}}"#,
            ),
        )
        .await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "not allowed");
    }

    #[tokio::test]
    async fn chat_stream_emits_chunks_then_done() {
        let app = build_router(state(&[]));
        let response = app
            .oneshot(post_json("/chat/stream", r#"{"message":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        let chunk_at = text.find("event: chunk").unwrap();
        let done_at = text.find("event: done").unwrap();
        assert!(chunk_at < done_at);
        assert!(text.contains("Hello! I'm demo"));
    }
}
