//! HTTP request handlers for the REST API.

pub mod conversation;
pub mod health;

use std::future::Future;

use parley_types::error::ChatError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::http::error::AppError;
use crate::state::AppState;

/// Run `operation` under the configured request deadline. The token it
/// receives is a child of the server shutdown token and is cancelled when
/// the deadline passes.
pub(crate) async fn with_deadline<T, F, Fut>(state: &AppState, operation: F) -> Result<T, AppError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let token = state.shutdown.child_token();
    let timeout = state.config.server.request_timeout();

    match tokio::time::timeout(timeout, operation(token.clone())).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => {
            token.cancel();
            warn!(timeout_secs = timeout.as_secs(), "request deadline exceeded");
            Err(AppError::DeadlineExceeded)
        }
    }
}
