//! HTTP/REST API layer for Parley.
//!
//! Axum-based REST API at `/api/v1/` with per-caller rate limiting,
//! envelope response format, and CORS support.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod response;
pub mod router;
