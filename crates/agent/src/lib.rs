//! Agent runtime for the cafe assistant.
//!
//! A query flows through knowledge-base retrieval, a tool-using reasoning
//! loop, and content scanning before it reaches the customer:
//!
//! 1. **Retrieval** (`retrieval`) - top passages wrapped in `<context>` tags
//! 2. **Tools** (`tools`, `sql_tools`, `remote_tools`) - database tools plus
//!    whatever the configured MCP servers expose, assembled per turn
//! 3. **Reasoning** (`llm`, `openai`) - an OpenAI-compatible chat loop
//! 4. **Scanning** (`scanner`) - fail-open input and output checks, repeated
//!    progressively while a response streams
//!
//! `runtime::AgentRuntime` drives the whole flow. `conversation` keeps the
//! per-conversation history it reads from and commits to.

pub mod conversation;
pub mod llm;
pub mod openai;
pub mod remote_tools;
pub mod retrieval;
pub mod runtime;
pub mod scanner;
pub mod sql_tools;
pub mod tools;

pub use conversation::{ConversationStore, Session};
pub use runtime::{AgentRuntime, EventStream, HistoryAccess};
pub use scanner::ContentScanner;
