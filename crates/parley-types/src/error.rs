use thiserror::Error;

use crate::llm::LlmError;

/// Errors from durable-store operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from the fast cache tier. A miss is never an error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode cached value: {0}")]
    Encode(String),

    #[error("failed to decode cached value: {0}")]
    Decode(String),
}

/// Errors from session resolution.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session identity: {0}")]
    InvalidIdentity(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("session resolution cancelled")]
    Cancelled,
}

/// Errors from context window persistence.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Errors surfaced to callers of the chat service.
///
/// Degraded-but-successful outcomes (summary failures, cache errors,
/// title generation failures) never appear here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conversation not found")]
    NotFound,

    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for ChatError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ChatError::NotFound,
            other => ChatError::Storage(other.to_string()),
        }
    }
}

impl From<SessionError> for ChatError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidIdentity(msg) => ChatError::Validation(msg),
            SessionError::Storage(e) => ChatError::from(e),
            SessionError::Cancelled => ChatError::Cancelled,
        }
    }
}

impl From<ContextError> for ChatError {
    fn from(e: ContextError) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<LlmError> for ChatError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => ChatError::Cancelled,
            e if e.is_unavailable() => ChatError::Unavailable(e.to_string()),
            LlmError::RateLimited { .. }
            | LlmError::Overloaded(_)
            | LlmError::Network(_)
            | LlmError::Timeout(_) => ChatError::Unavailable(e.to_string()),
            LlmError::Http { status, .. } if status >= 500 => {
                ChatError::Unavailable(e.to_string())
            }
            other => ChatError::Internal(other.to_string()),
        }
    }
}

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
