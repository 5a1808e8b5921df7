//! Chat history endpoint.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::config::HistoryPolicy;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::chat_message::StoredMessage;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat/{room_id}", get(get_chat_history))
}

// ---------------------------------------------------------------------------
// GET /chat/{room_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatHistoryResponse {
    pub room_id: String,
    pub total_messages: usize,
    pub messages: Vec<StoredMessage>,
}

#[utoipa::path(
    get,
    path = "/chat/{room_id}",
    tag = "Chat",
    security(("bearer" = [])),
    params(("room_id" = String, Path, description = "Room ID (job or application ID)")),
    responses(
        (status = 200, description = "Room history, oldest first", body = ChatHistoryResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "No messages (only with the not_found policy)", body = ApiErrorBody),
    ),
)]
pub async fn get_chat_history(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let messages = state.store.history(&room_id).await?;

    if messages.is_empty() && state.config.history_policy == HistoryPolicy::NotFound {
        return Err(ApiError::not_found("No messages found for this room"));
    }

    tracing::debug!(%room_id, %user_id, count = messages.len(), "chat history served");

    Ok(Json(ChatHistoryResponse {
        room_id,
        total_messages: messages.len(),
        messages,
    }))
}
