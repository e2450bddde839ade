//! Login-code authentication over the KV facade, plus the bearer-token
//! middleware protecting the API.
//!
//! Code delivery is the mail service's job (an external collaborator);
//! in development the code lands in the log.

use axum::extract::{Json, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

use super::api_error;

/// Verified identity attached to every protected request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub refresh_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Require a valid access token (whose refresh token still exists) and
/// an active user; attaches [`CurrentUser`] to the request.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    let claims = match state.auth.verify_access(token) {
        Ok(c) => c,
        Err(e) => return api_error(StatusCode::UNAUTHORIZED, e.to_string()),
    };

    match state.store.get_user(claims.user_id).await {
        Ok(Some(user)) if user.is_active => {}
        Ok(_) => return api_error(StatusCode::FORBIDDEN, "user is inactive"),
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed in auth middleware");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed");
        }
    }

    req.extensions_mut().insert(CurrentUser {
        id: claims.user_id,
        refresh_id: claims.refresh_id,
    });
    next.run(req).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/auth/send-code
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

pub async fn send_code(
    State(state): State<AppState>,
    Json(body): Json<SendCodeRequest>,
) -> Response {
    let email = body.email.trim().to_lowercase();
    if !email.contains('@') || email.len() < 3 {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid email address");
    }

    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
    state
        .kv
        .save_login_code(&email, &code, state.auth.login_code_ttl());

    // Delivery belongs to the mail service; surface it for development.
    tracing::info!(email = %email, code = %code, "login code issued");

    Json(json!({ "message": "verification code sent" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/auth/login
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub code: String,
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    let email = body.email.trim().to_lowercase();

    match state.kv.get_login_code(&email) {
        Some(code) if code == body.code.trim() => {}
        _ => return api_error(StatusCode::UNAUTHORIZED, "invalid or expired code"),
    }
    // Codes are single-use.
    state.kv.delete_login_code(&email);

    let user = match state.store.get_or_create_user(&email).await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(error = %e, "user upsert failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "login failed");
        }
    };
    if !user.is_active {
        return api_error(StatusCode::FORBIDDEN, "user is inactive");
    }

    let refresh_token = Uuid::new_v4().to_string();
    state
        .kv
        .save_refresh_token(&refresh_token, user.id, state.auth.refresh_ttl());
    let access_token = state.auth.mint_access(user.id, &refresh_token);

    Json(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "bearer",
        "expires_in": state.auth.access_ttl().as_secs(),
        "user": { "id": user.id, "email": user.email, "role": user.role },
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/auth/refresh
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(State(state): State<AppState>, Json(body): Json<RefreshRequest>) -> Response {
    let Some(user_id) = state.kv.get_refresh_token(&body.refresh_token) else {
        return api_error(StatusCode::UNAUTHORIZED, "refresh token expired");
    };

    let access_token = state.auth.mint_access(user_id, &body.refresh_token);
    Json(json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": state.auth.access_ttl().as_secs(),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/auth/logout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn logout(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<CurrentUser>,
) -> Response {
    // Purging the refresh token also invalidates the access token that
    // carried it.
    state.kv.delete_refresh_token(&user.refresh_id);
    StatusCode::NO_CONTENT.into_response()
}
