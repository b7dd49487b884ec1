use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use cafe_core::config::AppConfig;
use cafe_core::domain::conversation::{Turn, TurnRole};
use cafe_core::domain::event::StreamEvent;
use cafe_core::domain::scan::ScanDirection;
use cafe_core::errors::ApplicationError;
use cafe_db::{DatabaseHandle, SqlToolkit};
use futures::{Stream, StreamExt};
use tracing::{error, info};

use crate::conversation::Session;
use crate::llm::{ChatMessage, Fragment, ReasoningLoop, ReasoningRequest};
use crate::openai::OpenAiReasoningLoop;
use crate::remote_tools::RemoteToolSource;
use crate::retrieval::{ContextRetriever, KnowledgeBaseRetriever};
use crate::scanner::{log_security_violation, ContentScanner, ViolationRecord};
use crate::sql_tools::DatabaseToolSource;
use crate::tools::ToolRegistry;

pub const SYSTEM_PROMPT: &str = "You are the assistant for a neighborhood pizza cafe. You know the cafe's background, account management, menus and orders, delivery and pickup, dining in, and payment options. Give customers precise answers about registration, login, order lookups, placing orders, discounts and refund policies, in a friendly and professional tone and in the language of the customer's question. For questions outside these topics, explain that you can only help with the cafe's services and suggest contacting the in-store staff or visiting the official website. Use the content enclosed in <context></context> tags as your knowledge. When you reference it, quote the original text without changes, including URLs.";

pub const PROCESSING_MESSAGE: &str = "Processing your request...";

pub const APOLOGY_MESSAGE: &str = "I apologize, but I encountered an error while processing your request. Please try again or contact our support team.";

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Where a query reads prior turns from and commits its outcome to.
#[derive(Clone, Debug)]
pub enum HistoryAccess {
    Session(Arc<Session>),
    Stateless,
}

impl HistoryAccess {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Session(session) => Some(session.id()),
            Self::Stateless => None,
        }
    }

    pub fn is_stateless(&self) -> bool {
        matches!(self, Self::Stateless)
    }

    pub async fn load(&self) -> Vec<Turn> {
        match self {
            Self::Session(session) => session.history().await,
            Self::Stateless => Vec::new(),
        }
    }

    pub async fn record_exchange(&self, user: &str, assistant: &str) {
        if let Self::Session(session) = self {
            session.record_exchange(user, assistant).await;
        }
    }

    pub async fn record_blocked(&self, user: &str) {
        if let Self::Session(session) = self {
            session.record_blocked(user).await;
        }
    }
}

/// Answers customer queries: retrieval, tool-using reasoning, and output scanning.
#[derive(Clone)]
pub struct AgentRuntime {
    retriever: Arc<dyn ContextRetriever>,
    tools: Arc<ToolRegistry>,
    reasoning: Arc<dyn ReasoningLoop>,
    scanner: ContentScanner,
    base_prompt: Arc<str>,
}

impl AgentRuntime {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        tools: ToolRegistry,
        reasoning: Arc<dyn ReasoningLoop>,
        scanner: ContentScanner,
    ) -> Self {
        Self { retriever, tools: Arc::new(tools), reasoning, scanner, base_prompt: Arc::from(SYSTEM_PROMPT) }
    }

    pub fn from_config(config: &AppConfig, database: DatabaseHandle) -> Result<Self> {
        let retriever = KnowledgeBaseRetriever::load(&config.knowledge_base)
            .context("loading knowledge base")?;
        let tools = ToolRegistry::new(
            Arc::new(DatabaseToolSource::new(SqlToolkit::new(database))),
            Arc::new(RemoteToolSource::new(config.mcp.servers.clone())),
        );
        let reasoning = OpenAiReasoningLoop::from_config(&config.llm)?;
        let scanner = ContentScanner::from_config(&config.security);

        Ok(Self::new(Arc::new(retriever), tools, Arc::new(reasoning), scanner))
    }

    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = Arc::from(prompt.into());
        self
    }

    pub fn scanner(&self) -> &ContentScanner {
        &self.scanner
    }

    async fn build_request(
        &self,
        message: &str,
        context: &str,
        history: &HistoryAccess,
    ) -> Result<ReasoningRequest> {
        let tools = self.tools.assemble().await?;

        let prior = history.load().await;
        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(ChatMessage::system(format!("{}\n\n{}", self.base_prompt, context)));
        messages.extend(prior.into_iter().map(|turn| match turn.role {
            TurnRole::User => ChatMessage::user(turn.content),
            TurnRole::Assistant => ChatMessage::assistant(turn.content),
        }));
        messages.push(ChatMessage::user(message));

        Ok(ReasoningRequest { messages, tools })
    }

    /// Scans a response against the output profile. On a block, logs the
    /// violation and records the user turn alone.
    async fn output_blocked(
        &self,
        response: &str,
        message: &str,
        history: &HistoryAccess,
        scan_context: &str,
        chunks: usize,
    ) -> bool {
        let profile = self.scanner.profile_for(ScanDirection::Output);
        let verdict = self.scanner.scan(ScanDirection::Output, response, profile).await;
        if !verdict.is_blocked() {
            return false;
        }

        log_security_violation(&ViolationRecord {
            direction: ScanDirection::Output,
            result: &verdict,
            profile,
            content: response,
            conversation_id: history.conversation_id(),
            scan_context: Some(scan_context),
            chunks_accumulated: Some(chunks),
        });
        history.record_blocked(message).await;
        true
    }

    /// Input scan done by callers before any work starts.
    pub async fn screen_input(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        if !self.scanner.is_enabled() {
            return Ok(());
        }

        let profile = self.scanner.profile_for(ScanDirection::Input);
        let verdict = self.scanner.scan(ScanDirection::Input, message, profile).await;
        if !verdict.is_blocked() {
            return Ok(());
        }

        log_security_violation(&ViolationRecord {
            direction: ScanDirection::Input,
            result: &verdict,
            profile,
            content: message,
            conversation_id,
            scan_context: None,
            chunks_accumulated: None,
        });
        Err(ApplicationError::ContentPolicy { direction: ScanDirection::Input })
    }

    /// Streams one answer as events. Exactly one `start` comes first and the
    /// stream ends after `done`, `error` or `security_violation`.
    pub fn stream_query(&self, message: impl Into<String>, history: HistoryAccess) -> EventStream {
        let runtime = self.clone();
        let message = message.into();

        Box::pin(async_stream::stream! {
            let conversation_id = history.conversation_id().map(str::to_string);
            yield StreamEvent::Start { conversation_id: conversation_id.clone() };
            yield StreamEvent::kb_search();

            let context = match runtime.retriever.retrieve(&message).await {
                Ok(context) => context,
                Err(failure) => {
                    yield stream_failure(failure.context("retrieving context"), conversation_id.as_deref());
                    return;
                }
            };

            let request = match runtime.build_request(&message, &context, &history).await {
                Ok(request) => request,
                Err(failure) => {
                    yield stream_failure(failure, conversation_id.as_deref());
                    return;
                }
            };
            let tools = request.tools.clone();

            let scanning = runtime.scanner.is_enabled();
            let interval = runtime.scanner.settings().stream_chunk_interval.max(1);
            let mut buffer = String::new();
            let mut chunks = 0usize;
            let mut fragments = runtime.reasoning.stream(request);

            while let Some(next) = fragments.next().await {
                let fragment = match next {
                    Ok(fragment) => fragment,
                    Err(failure) => {
                        yield stream_failure(failure, conversation_id.as_deref());
                        return;
                    }
                };

                match fragment {
                    Fragment::Model { content, tool_calls } => {
                        for call in tool_calls.iter().filter(|call| !call.name.is_empty()) {
                            let description = tools
                                .describe(&call.name)
                                .filter(|description| !description.trim().is_empty())
                                .unwrap_or(PROCESSING_MESSAGE);
                            yield StreamEvent::ToolCall {
                                tool_name: call.name.clone(),
                                description: description.to_string(),
                            };
                        }

                        if content.is_empty() {
                            continue;
                        }
                        buffer.push_str(&content);
                        chunks += 1;
                        yield StreamEvent::Token { content };

                        if scanning
                            && chunks % interval == 0
                            && runtime.output_blocked(&buffer, &message, &history, "progressive", chunks).await
                        {
                            yield StreamEvent::security_violation();
                            return;
                        }
                    }
                    Fragment::ToolResult { call_id, content } => {
                        yield StreamEvent::ToolResult { call_id, result: content };
                    }
                }
            }

            if scanning
                && !buffer.is_empty()
                && runtime.output_blocked(&buffer, &message, &history, "final", chunks).await
            {
                yield StreamEvent::security_violation();
                return;
            }

            history.record_exchange(&message, &buffer).await;
            info!(
                event_name = "agent.stream.completed",
                conversation_id = conversation_id.as_deref().unwrap_or("none"),
                chunks,
                "streamed response completed"
            );
            yield StreamEvent::Done;
        })
    }

    /// Runs the loop to completion without events, scanning or history writes.
    pub async fn complete(&self, message: &str, history: &HistoryAccess) -> Result<String> {
        let context = self.retriever.retrieve(message).await.context("retrieving context")?;
        let request = self.build_request(message, &context, history).await?;
        self.reasoning.run(request).await
    }

    /// `complete` plus history commit. Failures become an apology.
    pub async fn process_query(&self, message: &str, history: &HistoryAccess) -> String {
        match self.complete(message, history).await {
            Ok(response) => {
                history.record_exchange(message, &response).await;
                response
            }
            Err(failure) => {
                error!(
                    event_name = "agent.query.failed",
                    conversation_id = history.conversation_id().unwrap_or("none"),
                    error = %format!("{failure:#}"),
                    "error processing query"
                );
                APOLOGY_MESSAGE.to_string()
            }
        }
    }

    /// Non-streaming answer with one input scan before and one output scan after.
    pub async fn reply(&self, message: &str, history: &HistoryAccess) -> Result<String, ApplicationError> {
        self.screen_input(message, history.conversation_id()).await?;
        self.answer(message, history).await
    }

    /// The part of `reply` after the input scan. Failures become an apology
    /// and nothing is committed for them.
    pub async fn answer(&self, message: &str, history: &HistoryAccess) -> Result<String, ApplicationError> {
        let response = match self.complete(message, history).await {
            Ok(response) => response,
            Err(failure) => {
                error!(
                    event_name = "agent.query.failed",
                    conversation_id = history.conversation_id().unwrap_or("none"),
                    error = %format!("{failure:#}"),
                    "error processing query"
                );
                return Ok(APOLOGY_MESSAGE.to_string());
            }
        };

        if self.scanner.is_enabled() && self.output_blocked(&response, message, history, "final", 0).await {
            return Err(ApplicationError::ContentPolicy { direction: ScanDirection::Output });
        }

        history.record_exchange(message, &response).await;
        Ok(response)
    }
}

fn stream_failure(failure: anyhow::Error, conversation_id: Option<&str>) -> StreamEvent {
    let message = format!("{failure:#}");
    error!(
        event_name = "agent.stream.failed",
        conversation_id = conversation_id.unwrap_or("none"),
        error = %message,
        "streaming error"
    );
    StreamEvent::Error { message }
}
