//! Fixed-window rate limiting middleware.
//!
//! One counter per authenticated user (per source IP when the identity
//! is unknown), backed by the KV store's atomic window increment. The
//! limiter sits inside the auth layer so it sees [`CurrentUser`];
//! auth, health, and WebSocket routes never reach it.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

use super::auth::CurrentUser;

pub async fn fixed_window(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let config = &state.config.rate_limit;
    if !config.enabled {
        return next.run(req).await;
    }

    let scope = req
        .extensions()
        .get::<CurrentUser>()
        .map(|u| format!("user:{}", u.id))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| format!("ip:{}", info.0.ip()))
        })
        .unwrap_or_else(|| "anon".to_string());

    let window = Duration::from_secs(config.window_secs);
    let (count, reset_secs) = state.kv.rate_limit_incr(&scope, window);

    if count > config.limit {
        tracing::warn!(scope = %scope, count, "rate limit exceeded");
        let mut response = super::api_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        set_limit_headers(&mut response, config.limit, 0, reset_secs);
        if let Ok(value) = HeaderValue::from_str(&config.window_secs.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
        return response;
    }

    let remaining = config.limit - count;
    let mut response = next.run(req).await;
    set_limit_headers(&mut response, config.limit, remaining, reset_secs);
    response
}

fn set_limit_headers(response: &mut Response, limit: u64, remaining: u64, reset_secs: u64) {
    let headers = response.headers_mut();
    // Header names must be lowercase for `from_static`.
    let mut put = |name: &'static str, value: u64| {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    };
    put("x-ratelimit-limit", limit);
    put("x-ratelimit-remaining", remaining);
    put("x-ratelimit-reset", reset_secs);
}
