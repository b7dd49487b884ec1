use std::convert::Infallible;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use cafe_agent::HistoryAccess;
use cafe_core::errors::InterfaceError;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{new_correlation_id, ApiError, AppState};

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stateless: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    fn validate(&self, correlation_id: &str) -> Result<(), ApiError> {
        if self.message.trim().is_empty() {
            return Err(ApiError(InterfaceError::BadRequest {
                message: "message must not be empty".to_string(),
                correlation_id: correlation_id.to_string(),
            }));
        }
        Ok(())
    }

    /// Stateless requests have no conversation. Others reuse the given id or mint one.
    fn conversation_key(&self) -> Option<String> {
        if self.stateless {
            return None;
        }
        Some(
            self.conversation_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        )
    }
}

async fn resolve_history(state: &AppState, conversation_key: Option<&str>) -> HistoryAccess {
    match conversation_key {
        Some(id) => HistoryAccess::Session(state.conversations.get_or_create(id).await),
        None => HistoryAccess::Stateless,
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    request.validate(&correlation_id)?;

    let conversation_key = request.conversation_key();
    state
        .runtime
        .screen_input(&request.message, conversation_key.as_deref())
        .await
        .map_err(|error| ApiError(error.into_interface(&correlation_id)))?;

    let history = resolve_history(&state, conversation_key.as_deref()).await;
    info!(
        event_name = "api.chat.request",
        correlation_id = %correlation_id,
        conversation_id = history.conversation_id().unwrap_or("none"),
        stateless = request.stateless,
        message_length = request.message.len(),
        "chat request received"
    );

    let response = state
        .runtime
        .answer(&request.message, &history)
        .await
        .map_err(|error| ApiError(error.into_interface(&correlation_id)))?;

    Ok(Json(ChatResponse {
        response,
        conversation_id: history.conversation_id().map(str::to_string),
    }))
}

/// Opens an SSE stream of `data: {json}` frames. The input scan runs before
/// the stream opens so a block is a plain 403.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = new_correlation_id();
    request.validate(&correlation_id)?;

    let conversation_key = request.conversation_key();
    state
        .runtime
        .screen_input(&request.message, conversation_key.as_deref())
        .await
        .map_err(|error| ApiError(error.into_interface(&correlation_id)))?;

    let history = resolve_history(&state, conversation_key.as_deref()).await;
    info!(
        event_name = "api.chat.stream_opened",
        correlation_id = %correlation_id,
        conversation_id = history.conversation_id().unwrap_or("none"),
        stateless = request.stateless,
        message_length = request.message.len(),
        "streaming chat request received"
    );

    let frames = state
        .runtime
        .stream_query(request.message, history)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));

    Ok(([("x-accel-buffering", "no")], Sse::new(frames).keep_alive(KeepAlive::default())))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use cafe_core::domain::event::StreamEvent;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::ChatRequest;
    use crate::routes::testing::app;

    fn post(uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    fn events(body: &[u8]) -> Vec<StreamEvent> {
        String::from_utf8_lossy(body)
            .split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).expect("event json"))
            .collect()
    }

    fn request(conversation_id: Option<&str>, stateless: bool) -> ChatRequest {
        ChatRequest {
            message: "hi".to_string(),
            conversation_id: conversation_id.map(str::to_string),
            stateless,
        }
    }

    #[test]
    fn conversation_key_is_absent_only_for_stateless_requests() {
        assert_eq!(request(Some("k"), true).conversation_key(), None);
        assert_eq!(request(None, true).conversation_key(), None);
        assert_eq!(request(Some("k"), false).conversation_key().as_deref(), Some("k"));

        let minted = request(None, false).conversation_key().expect("minted id");
        assert!(uuid::Uuid::parse_str(&minted).is_ok());
        let blank = request(Some("  "), false).conversation_key().expect("minted id");
        assert!(uuid::Uuid::parse_str(&blank).is_ok());
    }

    #[tokio::test]
    async fn chat_creates_a_conversation_when_none_is_given() {
        let (router, state) = app(vec!["We open", " at 11am."]);

        let (status, body) = send(&router, post("/api/v1/chat", json!({"message": "When do you open?"}))).await;

        assert_eq!(status, StatusCode::OK);
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["response"], "We open at 11am.");
        let conversation_id = payload["conversation_id"].as_str().expect("conversation id").to_string();
        assert_eq!(state.conversations.list().await, vec![conversation_id.clone()]);

        let session = state.conversations.get(&conversation_id).await.expect("session");
        assert_eq!(session.len().await, 2);
    }

    #[tokio::test]
    async fn stateless_chat_returns_null_conversation() {
        let (router, state) = app(vec!["Hello!"]);

        let (status, body) = send(
            &router,
            post("/api/v1/chat", json!({"message": "hi", "conversation_id": "k", "stateless": true})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload, json!({"response": "Hello!", "conversation_id": null}));
        assert!(state.conversations.is_empty().await);
    }

    #[tokio::test]
    async fn blocked_input_returns_403_without_creating_a_conversation() {
        let (router, state) = app(vec!["never sent"]);

        let (status, body) =
            send(&router, post("/api/v1/chat", json!({"message": "forbidden words", "conversation_id": "s1"}))).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(
            payload["detail"],
            "Your request couldn't be processed due to our content policy. Please rephrase your message and try again."
        );
        assert!(state.conversations.is_empty().await);
    }

    #[tokio::test]
    async fn blocked_output_returns_403_and_keeps_the_user_turn() {
        let (router, state) = app(vec!["this is forbidden"]);

        let (status, body) =
            send(&router, post("/api/v1/chat", json!({"message": "tell me", "conversation_id": "s1"}))).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(
            payload["detail"],
            "The response couldn't be displayed due to our content policy. Please try a different question."
        );

        let session = state.conversations.get("s1").await.expect("session");
        assert_eq!(session.len().await, 1);
        assert!(session.exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn blank_message_is_a_bad_request() {
        let (router, _) = app(vec!["unused"]);

        let (status, _) = send(&router, post("/api/v1/chat", json!({"message": "   "}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_emits_sse_frames_and_commits_history() {
        let (router, state) = app(vec!["We", " serve", " pizza."]);

        let response = router
            .clone()
            .oneshot(post("/api/v1/chat/stream", json!({"message": "menu?", "conversation_id": "s1"})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("text/event-stream")
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");

        let received = events(&body);
        assert_eq!(received.first(), Some(&StreamEvent::Start { conversation_id: Some("s1".to_string()) }));
        assert_eq!(received.last(), Some(&StreamEvent::Done));
        assert_eq!(received.iter().filter(|event| matches!(event, StreamEvent::Token { .. })).count(), 3);

        let exchanges = state.conversations.get("s1").await.expect("session").exchanges().await;
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].assistant, "We serve pizza.");
    }

    #[tokio::test]
    async fn stream_output_block_ends_with_security_violation() {
        let (router, _) = app(vec!["something", " forbidden"]);

        let (status, body) =
            send(&router, post("/api/v1/chat/stream", json!({"message": "hi", "stateless": true}))).await;

        assert_eq!(status, StatusCode::OK);
        let received = events(&body);
        assert_eq!(received.first(), Some(&StreamEvent::Start { conversation_id: None }));
        assert_eq!(received.last(), Some(&StreamEvent::security_violation()));
        assert!(!received.contains(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn stream_input_block_is_rejected_before_streaming() {
        let (router, state) = app(vec!["unused"]);

        let (status, body) =
            send(&router, post("/api/v1/chat/stream", json!({"message": "forbidden", "conversation_id": "s1"}))).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert!(payload["detail"].as_str().is_some_and(|detail| detail.contains("rephrase")));
        assert!(state.conversations.is_empty().await);
    }
}
