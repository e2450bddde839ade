//! Model catalog endpoint.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::state::AppState;

use super::api_error;

/// GET /api/v1/chat/models — enabled models, in display order.
pub async fn list_models(State(state): State<AppState>) -> Response {
    match state.store.list_models().await {
        Ok(models) => Json(json!({ "models": models })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "model list failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "list failed")
        }
    }
}
