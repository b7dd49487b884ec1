use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::tools::ToolSet;

/// A tool call requested by the model. `arguments` is the raw JSON text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String, tool_calls: Vec<ToolInvocation> },
    Tool { tool_call_id: String, content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant { content: content.into(), tool_calls: Vec::new() }
    }
}

/// One piece of reasoning-loop output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    /// Model output: text, tool-call requests, or both. Streaming tool-call
    /// continuations arrive with an empty `name`.
    Model { content: String, tool_calls: Vec<ToolInvocation> },
    /// Result of a tool the loop executed.
    ToolResult { call_id: String, content: String },
}

impl Fragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Model { content: content.into(), tool_calls: Vec::new() }
    }
}

#[derive(Clone, Debug)]
pub struct ReasoningRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: ToolSet,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

/// A model-driven loop that may call tools before answering.
#[async_trait]
pub trait ReasoningLoop: Send + Sync {
    /// Runs to completion and returns the final answer text.
    async fn run(&self, request: ReasoningRequest) -> Result<String>;

    /// Runs incrementally. The stream ends when the model answers without tool calls.
    fn stream(&self, request: ReasoningRequest) -> FragmentStream;
}

/// Executes one requested tool. Failures are returned as text so the model can recover.
pub async fn execute_tool(tools: &ToolSet, invocation: &ToolInvocation) -> String {
    let Some(tool) = tools.get(&invocation.name) else {
        warn!(tool = %invocation.name, "model requested an unknown tool");
        return format!(
            "Error: {} is not a valid tool, try one of [{}].",
            invocation.name,
            tools.names().join(", ")
        );
    };

    let arguments = if invocation.arguments.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_str::<Value>(&invocation.arguments) {
            Ok(value) => value,
            Err(error) => return format!("Error: invalid tool arguments: {error}"),
        }
    };

    info!(
        event_name = "agent.tool.call",
        tool = %invocation.name,
        call_id = %invocation.id,
        arguments = %arguments,
        "tool call"
    );
    match tool.invoke(arguments).await {
        Ok(output) => {
            info!(event_name = "agent.tool.result", tool = %invocation.name, output = %output, "tool response");
            output
        }
        Err(error) => {
            warn!(event_name = "agent.tool.error", tool = %invocation.name, error = %error, "tool error");
            format!("Error: {error:#}")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tools::testing::EchoTool;
    use crate::tools::ToolSet;

    use super::{execute_tool, ToolInvocation};

    fn invocation(name: &str, arguments: &str) -> ToolInvocation {
        ToolInvocation { id: "call_1".to_string(), name: name.to_string(), arguments: arguments.to_string() }
    }

    #[tokio::test]
    async fn executes_known_tool_with_parsed_arguments() {
        let mut tools = ToolSet::default();
        tools.register(EchoTool { name: "menu", description: "menu lookup" });

        let output = execute_tool(&tools, &invocation("menu", r#"{"item":"pizza"}"#)).await;
        assert_eq!(output, r#"menu({"item":"pizza"})"#);

        let empty = execute_tool(&tools, &invocation("menu", "")).await;
        assert_eq!(empty, "menu({})");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_json_become_error_text() {
        let mut tools = ToolSet::default();
        tools.register(EchoTool { name: "menu", description: "menu lookup" });

        let unknown = execute_tool(&tools, &invocation("orders", "{}")).await;
        assert!(unknown.starts_with("Error: orders is not a valid tool"));

        let malformed = execute_tool(&tools, &invocation("menu", "{not json")).await;
        assert!(malformed.starts_with("Error: invalid tool arguments"));
    }
}
