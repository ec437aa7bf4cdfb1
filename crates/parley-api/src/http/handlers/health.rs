//! Liveness, readiness and breaker administration.
//!
//! Endpoints:
//! - GET  /health                       - Liveness plus circuit breaker state
//! - GET  /ready                        - Database round trip
//! - POST /api/v1/admin/circuit/reset   - Force the breaker closed

use axum::Json;
use axum::extract::State;
use parley_core::resilience::breaker::{BreakerSnapshot, CircuitState};
use serde::Serialize;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `ok`, or `degraded` while the completion circuit is not closed.
    pub status: &'static str,
    pub version: &'static str,
    pub circuit: BreakerSnapshot,
    pub rate_limited_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadyReport {
    pub ready: bool,
    pub database: &'static str,
}

/// GET /health - Liveness. Always 200 while the process serves requests.
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthReport>> {
    let clock = RequestClock::start();
    let circuit = state.breaker.snapshot();
    let status = if circuit.state == CircuitState::Closed {
        "ok"
    } else {
        "degraded"
    };

    Json(clock.success(HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        circuit,
        rate_limited_clients: state.rate_limiter.tracked_keys(),
    }))
}

/// GET /ready - 200 once the database answers, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> Result<Json<ApiResponse<ReadyReport>>, AppError> {
    let clock = RequestClock::start();

    if let Err(e) = state.db_pool.ping().await {
        tracing::warn!(error = %e, "readiness check failed");
        return Err(AppError::NotReady("database unreachable".to_string()));
    }

    Ok(Json(clock.success(ReadyReport {
        ready: true,
        database: "ok",
    })))
}

/// POST /api/v1/admin/circuit/reset - Close the completion circuit.
pub async fn reset_circuit(State(state): State<AppState>) -> Json<ApiResponse<BreakerSnapshot>> {
    let clock = RequestClock::start();
    state.breaker.reset();
    tracing::info!(dependency = %state.breaker.dependency(), "circuit breaker reset by operator");

    Json(clock.success(state.breaker.snapshot()))
}
