pub mod chat;
pub mod health;
pub mod sessions;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/chat", post(chat::chat))
        .route("/v1/sessions/:user_id", get(sessions::list_sessions))
        .route(
            "/v1/sessions/:user_id/:session_id/history",
            get(sessions::get_history),
        )
        .route(
            "/v1/sessions/:user_id/:session_id",
            delete(sessions::delete_session),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
