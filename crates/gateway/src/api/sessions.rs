//! Session listing, history retrieval, and deletion.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use cce_domain::turn::{Session, Turn};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<Session>> {
    Json(state.session_manager.list_sessions(&user_id))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path((_user_id, session_id)): Path<(String, String)>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        turns: state.tier_store.list(&session_id),
        session_id,
    })
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.session_manager.delete_session(&user_id, &session_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
