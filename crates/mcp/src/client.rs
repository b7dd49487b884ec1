use cafe_core::config::{McpServerConfig, McpTransport};
use rmcp::model::{CallToolRequestParam, CallToolResult, RawContent};
use rmcp::service::RunningService;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{McpError, McpResult};

/// A tool as advertised by a remote server.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A live session with one remote tool server. Dropping it closes the session.
pub struct RemoteToolClient {
    server: String,
    service: RunningService<RoleClient, ()>,
}

impl std::fmt::Debug for RemoteToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteToolClient").field("server", &self.server).finish_non_exhaustive()
    }
}

impl RemoteToolClient {
    pub async fn connect(config: &McpServerConfig) -> McpResult<Self> {
        let server = config.name.clone();
        let service = match &config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args).envs(env);
                let transport = TokioChildProcess::new(cmd)
                    .map_err(|source| McpError::Spawn { server: server.clone(), source })?;
                ().serve(transport).await.map_err(|error| McpError::Handshake {
                    server: server.clone(),
                    message: error.to_string(),
                })?
            }
            McpTransport::StreamableHttp { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ().serve(transport).await.map_err(|error| McpError::Handshake {
                    server: server.clone(),
                    message: error.to_string(),
                })?
            }
            McpTransport::Sse { .. } => {
                return Err(McpError::UnsupportedTransport { server, transport: "sse" });
            }
        };

        info!(
            event_name = "mcp.client.connected",
            server = %server,
            transport = config.transport_name(),
            "connected to tool server"
        );
        Ok(Self { server, service })
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub async fn list_tools(&self) -> McpResult<Vec<RemoteToolSpec>> {
        let tools = self.service.list_all_tools().await.map_err(|error| McpError::Request {
            server: self.server.clone(),
            message: error.to_string(),
        })?;

        Ok(tools
            .into_iter()
            .map(|tool| RemoteToolSpec {
                name: tool.name.to_string(),
                description: tool.description.map(|text| text.to_string()).unwrap_or_default(),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    /// Calls a tool and flattens its result to text.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<String> {
        let arguments = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => return Err(McpError::InvalidArguments(other.to_string())),
        };

        debug!(event_name = "mcp.tool.call", server = %self.server, tool = name, "calling remote tool");
        let result = self
            .service
            .call_tool(CallToolRequestParam { name: name.to_string().into(), arguments })
            .await
            .map_err(|error| McpError::Request {
                server: self.server.clone(),
                message: error.to_string(),
            })?;

        render_call_result(result)
            .map_err(|message| McpError::ToolFailed { tool: name.to_string(), message })
    }

    pub async fn shutdown(self) {
        if let Err(error) = self.service.cancel().await {
            debug!(server = %self.server, error = %error, "tool server session did not close cleanly");
        }
    }
}

/// Joins the text blocks of a tool result. Structured content is used when no
/// text block is present. An error result becomes `Err` with the same text.
pub fn render_call_result(result: CallToolResult) -> Result<String, String> {
    let mut parts: Vec<String> = result
        .content
        .into_iter()
        .filter_map(|content| match content.raw {
            RawContent::Text(text) => Some(text.text),
            RawContent::Image(image) => Some(format!("[image] mime_type={}", image.mime_type)),
            RawContent::Resource(_) => Some("[resource]".to_string()),
            RawContent::Audio(audio) => Some(format!("[audio] mime_type={}", audio.mime_type)),
            RawContent::ResourceLink(link) => Some(format!("[resource_link] {}", link.uri)),
        })
        .collect();

    if parts.is_empty() {
        if let Some(value) = result.structured_content {
            parts.push(value.to_string());
        }
    }

    let text = parts.join("\n");
    if result.is_error.unwrap_or(false) {
        Err(text)
    } else {
        Ok(text)
    }
}

/// Connects to every configured server in order, stopping at the first failure.
pub async fn connect_all(servers: &[McpServerConfig]) -> McpResult<Vec<RemoteToolClient>> {
    let mut clients = Vec::with_capacity(servers.len());
    for server in servers {
        clients.push(RemoteToolClient::connect(server).await?);
    }
    Ok(clients)
}
