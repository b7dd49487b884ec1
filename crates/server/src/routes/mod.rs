//! HTTP surface of the cafe assistant.
//!
//! - `GET    /`                                     welcome payload
//! - `GET    /api/v1/health`                        readiness (see `health`)
//! - `POST   /api/v1/chat`                          scanned, non-streaming answer
//! - `POST   /api/v1/chat/stream`                   scanned SSE answer
//! - `GET    /api/v1/conversations`                 conversation ids
//! - `GET    /api/v1/conversations/{id}/history`    paired history
//! - `DELETE /api/v1/conversations/{id}`            drop a conversation
//! - `POST   /api/v1/conversations/{id}/clear`      empty a conversation's history

pub mod chat;
pub mod conversations;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use cafe_agent::{AgentRuntime, ConversationStore};
use cafe_core::errors::InterfaceError;
use cafe_db::DatabaseHandle;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct AppState {
    pub runtime: AgentRuntime,
    pub conversations: Arc<ConversationStore>,
}

impl AppState {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self { runtime, conversations: Arc::new(ConversationStore::new()) }
    }
}

pub fn router(state: AppState, database: DatabaseHandle) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/chat", post(chat::chat))
        .route("/api/v1/chat/stream", post(chat::chat_stream))
        .route("/api/v1/conversations", get(conversations::list))
        .route("/api/v1/conversations/{conversation_id}", delete(conversations::remove))
        .route("/api/v1/conversations/{conversation_id}/history", get(conversations::history))
        .route("/api/v1/conversations/{conversation_id}/clear", post(conversations::clear))
        .with_state(state)
        .merge(health::router(database))
        .layer(CorsLayer::permissive())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Welcome to the Cafe Assistant API",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/docs",
    }))
}

pub(crate) fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Error response with a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ContentPolicy { .. } => StatusCode::FORBIDDEN,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        warn!(
            event_name = "api.request.rejected",
            correlation_id = self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "request rejected"
        );

        (status, Json(json!({ "detail": self.0.user_message() }))).into_response()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::Router;
    use cafe_agent::llm::{Fragment, FragmentStream, ReasoningLoop, ReasoningRequest};
    use cafe_agent::retrieval::ContextRetriever;
    use cafe_agent::scanner::{ContentScanner, ScanCapability, ScanError, ScanSettings};
    use cafe_agent::tools::ToolRegistry;
    use cafe_agent::AgentRuntime;
    use cafe_core::domain::scan::{ScanDirection, ScanResult};
    use cafe_db::DatabaseHandle;

    use super::{router, AppState};

    struct EmptyContext;

    #[async_trait]
    impl ContextRetriever for EmptyContext {
        async fn retrieve(&self, _query: &str) -> Result<String> {
            Ok("<context></context>".to_string())
        }
    }

    /// Answers every query with the same pieces of text.
    pub struct CannedLoop(pub Vec<&'static str>);

    #[async_trait]
    impl ReasoningLoop for CannedLoop {
        async fn run(&self, _request: ReasoningRequest) -> Result<String> {
            Ok(self.0.concat())
        }

        fn stream(&self, _request: ReasoningRequest) -> FragmentStream {
            let fragments: Vec<Result<Fragment>> =
                self.0.iter().map(|piece| Ok(Fragment::text(*piece))).collect();
            Box::pin(futures::stream::iter(fragments))
        }
    }

    /// Blocks any text containing its marker.
    pub struct MarkerScanner(pub &'static str);

    #[async_trait]
    impl ScanCapability for MarkerScanner {
        async fn scan(
            &self,
            _direction: ScanDirection,
            text: &str,
            _profile: &str,
        ) -> Result<ScanResult, ScanError> {
            if text.contains(self.0) {
                Ok(ScanResult::block("test_marker"))
            } else {
                Ok(ScanResult::allow())
            }
        }
    }

    pub fn app(answer: Vec<&'static str>) -> (Router, AppState) {
        let scanner = ContentScanner::new(
            Some(Arc::new(MarkerScanner("forbidden")) as Arc<dyn ScanCapability>),
            ScanSettings {
                enabled: true,
                input_profile: "input-profile".to_string(),
                output_profile: "output-profile".to_string(),
                stream_chunk_interval: 50,
            },
        );
        let runtime = AgentRuntime::new(
            Arc::new(EmptyContext),
            ToolRegistry::default(),
            Arc::new(CannedLoop(answer)),
            scanner,
        );
        let state = AppState::new(runtime);
        let database = DatabaseHandle::new("/nonexistent/customer_db.sql", 1);
        (router(state.clone(), database), state)
    }
}
