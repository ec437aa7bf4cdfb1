//! Per-caller admission control for every route.
//!
//! The caller key is the first `X-Forwarded-For` entry, else `X-Real-IP`,
//! else the peer address. Rejected requests get 429 with `Retry-After`.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::http::response::ApiResponse;
use crate::state::AppState;

const UNKNOWN_CLIENT: &str = "unknown";

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    if state.rate_limiter.allow(&key) {
        return next.run(request).await;
    }

    tracing::warn!(
        client = %key,
        method = %request.method(),
        path = %request.uri().path(),
        "rate limit exceeded"
    );
    rejection(state.rate_limiter.requests_per_second())
}

/// Identify the caller for rate limiting.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn rejection(requests_per_second: f64) -> Response {
    let body = ApiResponse::error(
        "RATE_LIMITED",
        "Too many requests, please try again later",
        Uuid::now_v7().to_string(),
        0,
    );
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    if let Ok(limit) = HeaderValue::from_str(&format!("{requests_per_second:.0}")) {
        headers.insert("x-ratelimit-limit", limit);
    }
    response
}
