use serde::{Deserialize, Serialize};

pub const SECURITY_VIOLATION_MESSAGE: &str = "Response blocked due to content policy";
pub const KB_SEARCH_MESSAGE: &str = "Searching knowledge base...";

/// One event of a streamed answer, serialized with a `type` discriminator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start { conversation_id: Option<String> },
    KbSearch { message: String },
    ToolCall { tool_name: String, description: String },
    ToolResult { call_id: String, result: String },
    Token { content: String },
    SecurityViolation { message: String },
    Error { message: String },
    Done,
}

impl StreamEvent {
    pub fn kb_search() -> Self {
        Self::KbSearch { message: KB_SEARCH_MESSAGE.to_string() }
    }

    pub fn security_violation() -> Self {
        Self::SecurityViolation { message: SECURITY_VIOLATION_MESSAGE.to_string() }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::KbSearch { .. } => "kb_search",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Token { .. } => "token",
            Self::SecurityViolation { .. } => "security_violation",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    /// Whether no further events may follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. } | Self::Error { .. } | Self::Done)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        })
    }

    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}
