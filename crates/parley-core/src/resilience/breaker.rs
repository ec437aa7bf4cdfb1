//! Circuit breaker guarding a single downstream dependency.
//!
//! Closed -> Open after `max_failures` consecutive failures; Open rejects
//! without invoking the operation until `cooldown` has elapsed, then lets
//! exactly one probe through in HalfOpen. A successful probe closes the
//! circuit, a failed one reopens it.
//!
//! All state lives behind one `std::sync::Mutex` that is never held across
//! the guarded call.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use parley_types::config::CircuitBreakerConfig;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub failures: u32,
    /// Time since the most recent recorded failure.
    pub last_failure_age_ms: Option<u64>,
}

/// Outcome of a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit breaker for '{dependency}' is open")]
    Open { dependency: String },

    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    last_transition: Instant,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn transition(&mut self, dependency: &str, to: CircuitState) {
        let from = self.state;
        self.state = to;
        self.last_transition = Instant::now();
        match to {
            CircuitState::Open => warn!(dependency, %from, state = %to, failures = self.failures, "circuit opened"),
            _ => info!(dependency, %from, state = %to, "circuit state changed"),
        }
    }
}

/// Three-state circuit breaker.
///
/// Every error returned by the guarded operation counts as a failure.
/// Share it behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    max_failures: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, max_failures: u32, cooldown: Duration) -> Self {
        Self {
            dependency: dependency.into(),
            max_failures: max_failures.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                last_transition: Instant::now(),
                probe_in_flight: false,
            }),
        }
    }

    pub fn from_config(dependency: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(dependency, config.max_failures, config.cooldown())
    }

    /// Name of the guarded dependency.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Run `operation` through the breaker.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let probe = self.admit::<E>()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: probe,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(probe),
            Err(_) => self.record_failure(probe),
        }
        result.map_err(BreakerError::Inner)
    }

    /// Current state. An open circuit whose cooldown has elapsed is still
    /// reported as open until the next call probes it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            failures: inner.failures,
            last_failure_age_ms: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Force the circuit closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failures = 0;
        inner.probe_in_flight = false;
        inner.state = CircuitState::Closed;
        inner.last_transition = Instant::now();
        info!(dependency = %self.dependency, "circuit breaker reset");
    }

    // --- State machine ---

    /// Decide whether a call may proceed. Returns whether it is the probe.
    fn admit<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                if inner.last_transition.elapsed() >= self.cooldown {
                    inner.transition(&self.dependency, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(true)
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.open_error())
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen if probe => {
                inner.failures = 0;
                inner.probe_in_flight = false;
                inner.transition(&self.dependency, CircuitState::Closed);
            }
            // Calls admitted before the circuit opened do not close it.
            _ => {}
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.max_failures {
                    inner.transition(&self.dependency, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.failures += 1;
                inner.probe_in_flight = false;
                inner.transition(&self.dependency, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn open_error<E>(&self) -> BreakerError<E> {
        BreakerError::Open {
            dependency: self.dependency.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the half-open probe slot if the probe future is dropped
/// before it completes, so the next caller can probe instead.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
