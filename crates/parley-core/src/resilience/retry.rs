//! Retry with exponential backoff and jitter.
//!
//! `RetryExecutor` re-runs an operation while its error is classified as
//! transient, waiting `min(max_delay, base_delay * 2^attempt * jitter)`
//! between tries. The wait is the only suspension point it adds, and it is
//! cut short by the caller's cancellation token.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parley_types::config::RetryConfig;
use parley_types::llm::LlmError;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::breaker::BreakerError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Immutable retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first try. Total tries = `max_attempts + 1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classifies an error as transient (worth retrying) or permanent.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Substrings of provider messages that indicate a transport-level fault.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "reset",
    "refused",
    "eof",
    "network",
    "dial",
    "broken pipe",
];

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => *status >= 500 || *status == 429,
            LlmError::RateLimited { .. }
            | LlmError::Overloaded(_)
            | LlmError::Network(_)
            | LlmError::Timeout(_) => true,
            LlmError::Provider { message } => {
                let message = message.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
            }
            LlmError::Deserialization(_)
            | LlmError::AuthenticationFailed
            | LlmError::ContextLengthExceeded(_)
            | LlmError::InvalidRequest(_)
            | LlmError::CircuitOpen { .. }
            | LlmError::RetriesExhausted { .. }
            | LlmError::Cancelled => false,
        }
    }
}

/// An open circuit is never retried; failures of the guarded call are
/// classified by the inner error.
impl<E: Retryable> Retryable for BreakerError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            BreakerError::Open { .. } => false,
            BreakerError::Inner(e) => e.is_retryable(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryError
// ---------------------------------------------------------------------------

/// Why a retried operation ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The error was not retryable; returned after a single try.
    #[error("{0}")]
    Aborted(E),

    /// Every try failed with a retryable error.
    #[error("max retry attempts ({attempts}) reached, last error: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The cancellation token fired during a backoff wait.
    #[error("retry cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

/// Stateless retry executor.
///
/// No internal state; the policy and token are passed per call so one
/// executor serves every dependency.
pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `operation` until it succeeds, fails permanently, exhausts the
    /// policy, or `cancel` fires during a wait.
    pub async fn execute<T, E, F, Fut>(
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(attempt, error = %e, "non-retryable error, giving up");
                    return Err(RetryError::Aborted(e));
                }
                Err(e) => {
                    if attempt >= policy.max_attempts {
                        warn!(
                            attempts = attempt + 1,
                            error = %e,
                            "retry attempts exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            last: e,
                        });
                    }

                    let delay = Self::backoff_delay(policy, attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable error, backing off"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff before retry number `attempt + 1`, with random jitter.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Self::delay_with_jitter(policy, attempt, jitter)
    }

    /// `min(max_delay, base_delay * 2^attempt * jitter)`.
    pub fn delay_with_jitter(policy: &RetryPolicy, attempt: u32, jitter: f64) -> Duration {
        let factor = 2f64.powi(attempt.min(32) as i32) * jitter;
        let millis = policy.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(policy.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn server_error() -> LlmError {
        LlmError::Http {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_llm_error_classification() {
        assert!(server_error().is_retryable());
        assert!(LlmError::Http { status: 429, message: String::new() }.is_retryable());
        assert!(LlmError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(LlmError::Network("connection reset".into()).is_retryable());
        assert!(LlmError::Timeout("30s".into()).is_retryable());
        assert!(LlmError::Provider { message: "read: Connection refused".into() }.is_retryable());

        assert!(!LlmError::Http { status: 404, message: String::new() }.is_retryable());
        assert!(!LlmError::InvalidRequest("bad".into()).is_retryable());
        assert!(!LlmError::AuthenticationFailed.is_retryable());
        assert!(!LlmError::Provider { message: "unknown model".into() }.is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
        assert!(!LlmError::CircuitOpen { dependency: "openai".into() }.is_retryable());
    }

    #[test]
    fn test_breaker_error_classification() {
        let open: BreakerError<LlmError> = BreakerError::Open {
            dependency: "openai".into(),
        };
        assert!(!open.is_retryable());
        assert!(BreakerError::Inner(server_error()).is_retryable());
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(
            RetryExecutor::delay_with_jitter(&policy, 0, 1.0),
            Duration::from_millis(500)
        );
        assert_eq!(
            RetryExecutor::delay_with_jitter(&policy, 2, 1.0),
            Duration::from_millis(2000)
        );
        assert_eq!(
            RetryExecutor::delay_with_jitter(&policy, 10, 1.0),
            Duration::from_millis(5000)
        );
        assert_eq!(
            RetryExecutor::delay_with_jitter(&policy, 0, 0.5),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = RetryExecutor::backoff_delay(&policy, 1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, RetryError<LlmError>> =
            RetryExecutor::execute(&fast_policy(3), &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_invoked_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> =
            RetryExecutor::execute(&fast_policy(3), &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::InvalidRequest("missing field".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Aborted(LlmError::InvalidRequest(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_failing_tries_max_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> =
            RetryExecutor::execute(&fast_policy(3), &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(last, LlmError::Http { status: 503, .. }));
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result =
            RetryExecutor::execute(&fast_policy(3), &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(server_error()) } else { Ok("done") }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> =
            RetryExecutor::execute(&fast_policy(0), &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = RetryExecutor::execute(&policy, &token, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_invokes() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), RetryError<LlmError>> =
            RetryExecutor::execute(&fast_policy(3), &token, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
