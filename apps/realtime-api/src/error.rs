use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Application-level error for the realtime core.
///
/// The gateway never surfaces these to WebSocket clients; handlers log and
/// either abort the current operation (validation, persistence-before-push)
/// or skip the failed target (partial fan-out). Only the internal admin
/// routes convert them into HTTP responses.
#[derive(Debug)]
pub enum RealtimeError {
    /// The shared presence store rejected an operation.
    Store(String),
    /// The external persistence collaborator rejected a write.
    Persistence(String),
    /// Malformed or incomplete input on an inbound event.
    Validation(String),
}

impl RealtimeError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl fmt::Display for RealtimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(msg) => write!(f, "presence store error: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence error: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for RealtimeError {}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": { "message": self.to_string() }
        }));
        (status, body).into_response()
    }
}

impl From<redis::RedisError> for RealtimeError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(?err, "redis command failed");
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(?err, "presence payload (de)serialization failed");
        Self::Store(err.to_string())
    }
}
