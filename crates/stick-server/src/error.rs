//! Unified error handling for the API

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed or oversized request body
    InvalidRequest { status: StatusCode, message: String },
    NotFound,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InvalidRequest { status, message } => (
                status,
                ApiError {
                    error: "Invalid request".to_string(),
                    message: Some(message),
                },
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "Not found".to_string(),
                    message: None,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "Rejected request body");
        AppError::InvalidRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}
