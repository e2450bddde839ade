pub mod auth;
pub mod messages;
pub mod models;
pub mod rate_limit;
pub mod sessions;

use axum::extract::Json;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes split into **public** (health, login flow, WebSocket upgrade —
/// also exempt from rate limiting) and **protected** (bearer-token auth,
/// then the per-user fixed-window limiter).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/auth/send-code", axum::routing::post(auth::send_code))
        .route("/api/v1/auth/login", axum::routing::post(auth::login))
        .route("/api/v1/auth/refresh", axum::routing::post(auth::refresh))
        .route("/ws/chat", get(crate::ws::handler::chat_ws));

    let protected = Router::new()
        .route("/api/v1/auth/logout", axum::routing::post(auth::logout))
        .route(
            "/api/v1/chat/sessions",
            axum::routing::post(sessions::create_session).get(sessions::list_sessions),
        )
        .route(
            "/api/v1/chat/sessions/:id",
            get(sessions::get_session)
                .patch(sessions::update_session)
                .delete(sessions::delete_session),
        )
        .route(
            "/api/v1/chat/sessions/:id/messages",
            axum::routing::post(messages::post_message).get(messages::list_messages),
        )
        .route(
            "/api/v1/messages/:id",
            axum::routing::patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/api/v1/chat/models", get(models::list_models))
        // Innermost first: the limiter sees the authenticated identity.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::fixed_window,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth::require_user));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
