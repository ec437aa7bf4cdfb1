//! Axum router configuration with middleware.
//!
//! Conversation and admin routes are under `/api/v1/`; `/health` and
//! `/ready` sit at the root. Middleware: rate limiting, CORS, tracing.

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::http::rate_limit::rate_limit;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/conversations",
            post(handlers::conversation::start_conversation)
                .get(handlers::conversation::list_conversations),
        )
        .route(
            "/conversations/continue",
            post(handlers::conversation::continue_conversation),
        )
        .route(
            "/conversations/{id}",
            get(handlers::conversation::get_conversation),
        )
        .route(
            "/admin/circuit/reset",
            post(handlers::health::reset_circuit),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
