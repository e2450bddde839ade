//! Message endpoints: posting a user turn (which launches the agent
//! loop), history listing, edits, and deletes.

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use crate::runtime::{run_turn, TurnInput};
use crate::state::AppState;
use crate::ws::pump::pump_turn;

use super::api_error;
use super::auth::CurrentUser;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/chat/sessions/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default)]
    pub model_id: Option<String>,
    /// Set when re-sending after an edit, for provenance.
    #[serde(default)]
    pub parent_message_id: Option<String>,
}

/// Persist the user message and launch the turn; the assistant response
/// streams over the WebSocket.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Response {
    let session = match state.store.get_session(&session_id, user.id).await {
        Ok(Some(s)) => s,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            tracing::error!(error = %e, "session fetch failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "fetch failed");
        }
    };

    if body.content.trim().is_empty() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "message content is empty");
    }

    if let Some(model_id) = &body.model_id {
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

    let message = match state
        .store
        .create_message(
            &session.session_id,
            "user",
            &body.content,
            body.parent_message_id.as_deref(),
        )
        .await
    {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "user message insert failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "insert failed");
        }
    };

    // Launch the turn; its events flow to the user's WebSocket.
    let events = run_turn(
        state.clone(),
        TurnInput {
            session_id: session.session_id.clone(),
            user_id: user.id,
            user_text: body.content,
            model_id: body.model_id,
            user_message_id: Some(message.message_id.clone()),
        },
    );
    tokio::spawn(pump_turn(
        state.clone(),
        user.id,
        session.session_id.clone(),
        events,
    ));

    (StatusCode::CREATED, Json(message)).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/chat/sessions/:id/messages?limit=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Response {
    if let Ok(None) | Err(_) = state.store.get_session(&session_id, user.id).await {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }

    match state.store.list_messages(&session_id, query.limit).await {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "message list failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "list failed")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /api/v1/messages/:id — edit cascade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

/// Soft-delete the edited message and everything after it; the client is
/// expected to POST a fresh user turn to regenerate.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Response {
    if body.content.trim().is_empty() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "message content is empty");
    }

    let Some(message) = load_owned_message(&state, &message_id, user.id).await else {
        return api_error(StatusCode::NOT_FOUND, "message not found");
    };
    if message.role != "user" {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "only user messages can be edited");
    }

    match state.context.edit_message(&message).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "message edit failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "edit failed")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /api/v1/messages/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(message_id): Path<String>,
) -> Response {
    let Some(message) = load_owned_message(&state, &message_id, user.id).await else {
        return api_error(StatusCode::NOT_FOUND, "message not found");
    };

    match state.store.soft_delete_message(&message.message_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "message delete failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "delete failed")
        }
    }
}

/// Load a non-deleted message and verify the session belongs to the user.
async fn load_owned_message(
    state: &AppState,
    message_id: &str,
    user_id: i64,
) -> Option<parley_store::models::MessageRow> {
    let message = state.store.get_message(message_id).await.ok()??;
    if message.is_deleted {
        return None;
    }
    state
        .store
        .get_session(&message.session_id, user_id)
        .await
        .ok()??;
    Some(message)
}
