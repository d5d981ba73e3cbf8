//! Request-level error taxonomy.
//!
//! Every failure that can reach a caller is one of these variants. The HTTP
//! layer maps them onto status codes and the uniform
//! `{ "success": false, "error": ... }` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed or oversized input. Nothing was persisted.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Missing, invalid or expired credential.
    #[error("unauthenticated: {0}")]
    Auth(String),

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("conversation {0} belongs to another user")]
    Forbidden(String),

    /// The agent failed or timed out. The user turn stays persisted.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Store unavailable or write rejected.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("too many requests")]
    RateLimited,
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::Generation(_) | ChatError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Message shown to the caller. Internal details of generation and
    /// persistence failures stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Validation(msg) => format!("Invalid message: {}", msg),
            ChatError::Auth(msg) => msg.clone(),
            ChatError::NotFound(_) => "Conversation not found".to_string(),
            ChatError::Forbidden(_) => "Conversation belongs to another user".to_string(),
            ChatError::Generation(_) => {
                "Failed to generate a reply. Your message was saved, please try again.".to_string()
            }
            ChatError::Persistence(_) => "Failed to process the message. Please try again.".to_string(),
            ChatError::RateLimited => "Too many requests. Try again in a minute.".to_string(),
        }
    }

    /// Whether retrying the same request may succeed. Sent as `recoverable`
    /// in the error body.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChatError::Generation(_) | ChatError::RateLimited)
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Persistence(format!("corrupt record: {}", err))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        match status {
            StatusCode::INTERNAL_SERVER_ERROR => log::error!("Request failed: {}", self),
            _ => log::warn!("Request rejected: {}", self),
        }
        let body = json!({
            "success": false,
            "error": self.public_message(),
            "recoverable": self.is_recoverable(),
        });
        (status, Json(body)).into_response()
    }
}
