use axum::{
    extract::{Path, State},
    Json,
};
use cafe_core::domain::conversation::Exchange;
use cafe_core::errors::ApplicationError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{new_correlation_id, ApiError, AppState};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub messages: Vec<Exchange>,
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<String>> {
    let conversations = state.conversations.list().await;
    info!(event_name = "api.conversations.listed", count = conversations.len(), "listed conversations");
    Json(conversations)
}

pub async fn history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationHistory>, ApiError> {
    let Some(session) = state.conversations.get(&conversation_id).await else {
        return Err(not_found(conversation_id));
    };

    let messages = session.exchanges().await;
    info!(
        event_name = "api.conversations.history",
        conversation_id = %conversation_id,
        exchanges = messages.len(),
        "retrieved conversation history"
    );
    Ok(Json(ConversationHistory { conversation_id, messages }))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.conversations.delete(&conversation_id).await {
        return Err(not_found(conversation_id));
    }
    Ok(Json(json!({ "message": format!("Conversation {conversation_id} deleted successfully") })))
}

/// Creates the conversation if needed, so clearing never fails.
pub async fn clear(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    state.conversations.clear(&conversation_id).await;
    Json(json!({ "message": format!("Conversation {conversation_id} history cleared successfully") }))
}

fn not_found(conversation_id: String) -> ApiError {
    ApiError(
        ApplicationError::NotFound { resource: "conversation", id: conversation_id }
            .into_interface(new_correlation_id()),
    )
}
