use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cafe_core::config::{McpServerConfig, McpTransport};
use cafe_mcp::{connect_all, RemoteToolClient, RemoteToolSpec};
use serde_json::Value;
use tracing::{info, warn};

use crate::tools::{Tool, ToolSource};

/// Tool served by a remote tool server. Keeps the server session open while
/// any of its tools is alive.
pub struct RemoteTool {
    client: Arc<RemoteToolClient>,
    spec: RemoteToolSpec,
}

impl RemoteTool {
    pub fn new(client: Arc<RemoteToolClient>, spec: RemoteToolSpec) -> Self {
        Self { client, spec }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec.input_schema.clone()
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        Ok(self.client.call_tool(&self.spec.name, arguments).await?)
    }
}

/// Connects to the configured servers afresh on every load.
#[derive(Clone, Debug, Default)]
pub struct RemoteToolSource {
    servers: Vec<McpServerConfig>,
}

impl RemoteToolSource {
    pub fn new(servers: Vec<McpServerConfig>) -> Self {
        Self { servers }
    }

    fn connectable_servers(&self) -> Vec<McpServerConfig> {
        self.servers
            .iter()
            .filter(|server| {
                let supported = !matches!(server.transport, McpTransport::Sse { .. });
                if !supported {
                    warn!(
                        event_name = "agent.tools.transport_unsupported",
                        server = %server.name,
                        transport = server.transport_name(),
                        "skipping tool server with unsupported transport"
                    );
                }
                supported
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ToolSource for RemoteToolSource {
    fn label(&self) -> &'static str {
        "remote"
    }

    async fn load(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let servers = self.connectable_servers();
        if servers.is_empty() {
            info!(event_name = "agent.tools.remote_none", "no remote tool servers configured");
            return Ok(Vec::new());
        }

        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        for client in connect_all(&servers).await? {
            let client = Arc::new(client);
            for spec in client.list_tools().await? {
                tools.push(Arc::new(RemoteTool::new(Arc::clone(&client), spec)));
            }
        }

        info!(event_name = "agent.tools.remote_loaded", count = tools.len(), "remote tools loaded");
        Ok(tools)
    }
}

#[cfg(test)]
mod tests {
    use cafe_core::config::{McpServerConfig, McpTransport};

    use super::RemoteToolSource;
    use crate::tools::ToolSource;

    #[tokio::test]
    async fn no_servers_yields_no_tools() {
        let tools = RemoteToolSource::default().load().await.expect("load");
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn sse_only_configuration_is_skipped_without_error() {
        let source = RemoteToolSource::new(vec![McpServerConfig {
            name: "maps-sse".to_string(),
            transport: McpTransport::Sse { url: "https://maps.example.com/sse".to_string() },
        }]);

        let tools = source.load().await.expect("unsupported servers are skipped");
        assert!(tools.is_empty());
    }
}
