//! `POST /v1/chat` — the primary interface for running a conversation turn.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use cce_domain::turn::ChatStatus;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub assistant_text: String,
    pub status: ChatStatus,
}

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if body.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "message must not be empty").into_response();
    }

    let (session, _permit) = state
        .session_manager
        .admit(&body.user_id, body.session_id.as_deref())
        .await;

    let cancel = state.cancel_map.register(&body.user_id, &session.session_id);
    let result = state
        .orchestrator
        .run_turn(&body.user_id, &session.session_id, &body.message, &cancel)
        .await;
    state.cancel_map.remove(&body.user_id, &session.session_id);

    match result {
        Ok(turn) => Json(ChatResponse {
            session_id: session.session_id,
            assistant_text: turn.assistant_text,
            status: turn.status,
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("turn failed: {e}"),
        )
            .into_response(),
    }
}
