//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parley_types::error::ChatError;
use uuid::Uuid;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors from the chat service.
    Chat(ChatError),
    /// Malformed request input caught before reaching a service.
    Validation(String),
    /// The per-request deadline elapsed.
    DeadlineExceeded,
    /// A dependency the endpoint checks is down.
    NotReady(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Chat(ChatError::Validation(msg)) | AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Chat(ChatError::NotFound) => (
                StatusCode::NOT_FOUND,
                "CONVERSATION_NOT_FOUND",
                "Conversation not found".to_string(),
            ),
            AppError::Chat(ChatError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "The assistant is temporarily unavailable, please try again shortly".to_string(),
            ),
            AppError::Chat(ChatError::Cancelled) => (
                StatusCode::GATEWAY_TIMEOUT,
                "REQUEST_CANCELLED",
                "The request was cancelled".to_string(),
            ),
            AppError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                "DEADLINE_EXCEEDED",
                "The request took too long".to_string(),
            ),
            AppError::Chat(ChatError::Storage(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Failed to save the conversation".to_string(),
            ),
            AppError::Chat(ChatError::Internal(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal error".to_string(),
            ),
            AppError::NotReady(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        // Details of server-side failures stay in the log.
        match &self {
            AppError::Chat(ChatError::Storage(e) | ChatError::Internal(e)) => {
                tracing::error!(error = %e, code, "request failed");
            }
            AppError::Chat(ChatError::Unavailable(e)) => {
                tracing::warn!(error = %e, code, "request failed");
            }
            _ => {}
        }

        let body = ApiResponse::error(code, &message, Uuid::now_v7().to_string(), 0);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> (StatusCode, &'static str) {
        let (status, code, _) = err.parts();
        (status, code)
    }

    #[test]
    fn test_chat_errors_map_to_statuses() {
        assert_eq!(
            status_of(ChatError::Validation("message is required".into()).into()),
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
        );
        assert_eq!(
            status_of(ChatError::NotFound.into()),
            (StatusCode::NOT_FOUND, "CONVERSATION_NOT_FOUND")
        );
        assert_eq!(
            status_of(ChatError::Unavailable("circuit open".into()).into()),
            (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
        );
        assert_eq!(
            status_of(ChatError::Cancelled.into()),
            (StatusCode::GATEWAY_TIMEOUT, "REQUEST_CANCELLED")
        );
        assert_eq!(
            status_of(ChatError::Storage("disk full".into()).into()),
            (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
        );
        assert_eq!(
            status_of(AppError::DeadlineExceeded),
            (StatusCode::GATEWAY_TIMEOUT, "DEADLINE_EXCEEDED")
        );
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let (_, _, message) = AppError::from(ChatError::Storage("secret path".into())).parts();
        assert!(!message.contains("secret path"));

        let (_, _, message) =
            AppError::from(ChatError::Validation("message is required".into())).parts();
        assert_eq!(message, "message is required");
    }

    #[test]
    fn test_into_response_sets_status() {
        let resp = AppError::from(ChatError::NotFound).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
