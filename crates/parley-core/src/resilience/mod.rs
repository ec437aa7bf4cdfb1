//! Failure-handling primitives wrapped around calls to external services.
//!
//! - `RetryExecutor`: bounded retry with exponential backoff and jitter
//! - `CircuitBreaker`: three-state breaker guarding one dependency
//! - `RateLimiter`: per-key token buckets for inbound admission control
//!
//! The primitives are generic over the operation and its error type and
//! compose as `retry(breaker(call))`: every attempt passes through the
//! breaker, and an open circuit is never retried.

pub mod breaker;
pub mod rate_limit;
pub mod retry;

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Race `fut` against `cancel`. Returns `None` if the token fired first,
/// in which case `fut` is dropped without being polled to completion.
pub async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_completes() {
        let token = CancellationToken::new();
        assert_eq!(cancellable(&token, async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_stops_on_cancel() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let result = cancellable(&token, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            1
        })
        .await;
        assert_eq!(result, None);
    }
}
