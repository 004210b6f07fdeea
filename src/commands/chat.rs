use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::db::models::ChatExchange;
use crate::middleware::AuthUser;
use crate::rag::ChatReply;
use crate::state::AppState;
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "chatId")]
    pub chat_id: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(body): Json<SendMessage>,
) -> Result<Json<ChatReply>> {
    let reply = state
        .chat
        .respond(&user_id, &body.message, body.chat_id)
        .await?;
    Ok(Json(reply))
}

/// Exchanges of one conversation owned by the caller, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatExchange>>> {
    Ok(Json(state.chat.history(&user_id, &chat_id).await?))
}
