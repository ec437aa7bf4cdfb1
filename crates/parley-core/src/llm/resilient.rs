//! Retry + circuit breaker decorator for any `LlmProvider`.
//!
//! Composition is `retry(breaker(call))`: each attempt is recorded by the
//! breaker, and once the circuit opens the retry loop stops immediately
//! because an open circuit is not retryable.

use std::sync::Arc;

use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::resilience::breaker::{BreakerError, CircuitBreaker};
use crate::resilience::cancellable;
use crate::resilience::retry::{RetryError, RetryExecutor, RetryPolicy};

use super::provider::LlmProvider;

/// An `LlmProvider` whose calls are retried and guarded by a breaker.
///
/// The breaker is shared (`Arc`) so the health endpoint can report and
/// reset it. `shutdown` cuts short backoff waits when the process stops;
/// per-request cancellation is done by dropping the returned future.
pub struct ResilientProvider<P: LlmProvider> {
    inner: P,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl<P: LlmProvider> ResilientProvider<P> {
    pub fn new(
        inner: P,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner,
            breaker,
            policy,
            shutdown,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn into_llm_error(error: RetryError<BreakerError<LlmError>>) -> LlmError {
        match error {
            RetryError::Aborted(BreakerError::Open { dependency })
            | RetryError::Exhausted {
                last: BreakerError::Open { dependency },
                ..
            } => LlmError::CircuitOpen { dependency },
            RetryError::Aborted(BreakerError::Inner(e)) => e,
            RetryError::Exhausted {
                attempts,
                last: BreakerError::Inner(e),
            } => LlmError::RetriesExhausted {
                attempts,
                last: Box::new(e),
            },
            RetryError::Cancelled => LlmError::Cancelled,
        }
    }
}

impl<P: LlmProvider> LlmProvider for ResilientProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let span = info_span!(
            "gen_ai.complete",
            gen_ai.system = self.inner.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
        );

        let inner = &self.inner;
        let breaker = self.breaker.as_ref();
        let attempts = RetryExecutor::execute(&self.policy, &self.shutdown, move || {
            breaker.execute(move || inner.complete(request))
        });

        match cancellable(&self.shutdown, attempts).instrument(span).await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(Self::into_llm_error(e)),
            None => Err(LlmError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use parley_types::llm::Message;

    use crate::resilience::breaker::CircuitState;
    use crate::testing::{ScriptedProvider, upstream_error};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("hello")],
            max_tokens: 64,
            temperature: None,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn resilient(
        provider: ScriptedProvider,
        max_failures: u32,
        max_attempts: u32,
    ) -> ResilientProvider<ScriptedProvider> {
        ResilientProvider::new(
            provider,
            Arc::new(CircuitBreaker::new("scripted", max_failures, Duration::from_secs(30))),
            fast_policy(max_attempts),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = ScriptedProvider::scripted(vec![Err(upstream_error())], "recovered");
        let resilient = resilient(provider, 5, 3);

        let response = resilient.complete(&request()).await.unwrap();
        assert_eq!(response.content, "recovered");
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resilient.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_permanent_failure_passes_through() {
        let provider = ScriptedProvider::scripted(vec![Err(LlmError::AuthenticationFailed)], "x");
        let resilient = resilient(provider, 5, 3);

        let err = resilient.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed));
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_reported() {
        let script = (0..4).map(|_| Err(upstream_error())).collect();
        let resilient = resilient(ScriptedProvider::scripted(script, "never"), 10, 3);

        let err = resilient.complete(&request()).await.unwrap_err();
        match err {
            LlmError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, LlmError::Http { status: 503, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_circuit_stops_retrying() {
        let script = (0..10).map(|_| Err(upstream_error())).collect();
        let resilient = resilient(ScriptedProvider::scripted(script, "never"), 2, 5);

        let err = resilient.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::CircuitOpen { ref dependency } if dependency == "scripted"));
        // Two failures open the circuit; the third attempt is rejected.
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 2);

        let err = resilient.complete(&request()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_backoff() {
        let script = (0..10).map(|_| Err(upstream_error())).collect();
        let shutdown = CancellationToken::new();
        let resilient = ResilientProvider::new(
            ScriptedProvider::scripted(script, "never"),
            Arc::new(CircuitBreaker::new("scripted", 10, Duration::from_secs(30))),
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
            },
            shutdown.clone(),
        );

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = resilient.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
        assert_eq!(resilient.inner.calls.load(Ordering::SeqCst), 1);
    }
}
