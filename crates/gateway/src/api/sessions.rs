//! Session CRUD endpoints.

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use parley_store::models::{NewSession, SessionPatch};

use crate::state::AppState;

use super::api_error;
use super::auth::CurrentUser;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/chat/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateSessionRequest>,
) -> Response {
    if let Some(model_id) = &body.ai_model {
        match state.store.get_model(model_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return api_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("unknown model: {model_id}"),
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "model lookup failed");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed");
            }
        }
    }

    let new = NewSession {
        title: body.title,
        ai_model: body.ai_model,
        system_prompt: body.system_prompt,
        temperature: body.temperature,
        max_tokens: body.max_tokens,
    };
    match state.store.create_session(user.id, new).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "session create failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "create failed")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/chat/sessions?cursor=&limit=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    /// `last_activity_at` of the previous page's final row.
    #[serde(default)]
    pub cursor: Option<DateTime<Utc>>,
    #[serde(default = "d_limit")]
    pub limit: i64,
}

fn d_limit() -> i64 {
    20
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListSessionsQuery>,
) -> Response {
    let limit = query.limit.clamp(1, 100);
    match state.store.list_sessions(user.id, query.cursor, limit).await {
        Ok(sessions) => {
            let next_cursor = (sessions.len() as i64 == limit)
                .then(|| sessions.last().map(|s| s.last_activity_at))
                .flatten();
            Json(json!({ "sessions": sessions, "next_cursor": next_cursor })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "session list failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "list failed")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET / PATCH / DELETE /api/v1/chat/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.get_session(&session_id, user.id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            tracing::error!(error = %e, "session fetch failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "fetch failed")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
}

pub async fn update_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> Response {
    let patch = SessionPatch {
        title: body.title,
        ai_model: body.ai_model,
        system_prompt: body.system_prompt,
        temperature: body.temperature,
        max_tokens: body.max_tokens,
    };
    if patch.is_empty() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "nothing to update");
    }

    match state.store.update_session(&session_id, user.id, patch).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            tracing::error!(error = %e, "session update failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "update failed")
        }
    }
}

pub async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.soft_delete_session(&session_id, user.id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            tracing::error!(error = %e, "session delete failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "delete failed")
        }
    }
}
