use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Something the reasoning loop may call by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the accepted arguments object.
    fn parameters(&self) -> Value;
    async fn invoke(&self, arguments: Value) -> Result<String>;
}

/// The tools available to one turn, in registration order.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.push(Arc::new(tool));
    }

    pub fn extend(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        self.tools.extend(tools);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Declared description of a tool, if one with that name exists.
    pub fn describe(&self, name: &str) -> Option<&str> {
        self.get(name).map(|tool| tool.description())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    /// Function-calling declarations in the chat-completions wire shape.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// One origin of tools, asked for its tools on every assembly.
#[async_trait]
pub trait ToolSource: Send + Sync {
    fn label(&self) -> &'static str;
    async fn load(&self) -> Result<Vec<Arc<dyn Tool>>>;
}

/// Merges the database tools with the remote tools for each turn.
///
/// A database failure fails the assembly. A remote failure only costs the
/// remote tools for that turn.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    database: Option<Arc<dyn ToolSource>>,
    remote: Option<Arc<dyn ToolSource>>,
}

impl ToolRegistry {
    pub fn new(database: Arc<dyn ToolSource>, remote: Arc<dyn ToolSource>) -> Self {
        Self { database: Some(database), remote: Some(remote) }
    }

    pub fn with_database(mut self, source: Arc<dyn ToolSource>) -> Self {
        self.database = Some(source);
        self
    }

    pub fn with_remote(mut self, source: Arc<dyn ToolSource>) -> Self {
        self.remote = Some(source);
        self
    }

    pub async fn assemble(&self) -> Result<ToolSet> {
        let mut set = ToolSet::default();

        let database_tools = match &self.database {
            Some(source) => source
                .load()
                .await
                .with_context(|| format!("loading {} tools", source.label()))?,
            None => Vec::new(),
        };

        let remote_tools = match &self.remote {
            Some(source) => match source.load().await {
                Ok(tools) => tools,
                Err(error) => {
                    warn!(
                        event_name = "agent.tools.remote_unavailable",
                        source = source.label(),
                        error = %error,
                        "remote tool discovery failed; continuing without remote tools"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let (database_count, remote_count) = (database_tools.len(), remote_tools.len());
        set.extend(database_tools);
        set.extend(remote_tools);

        info!(
            event_name = "agent.tools.assembled",
            total = set.len(),
            database = database_count,
            remote = remote_count,
            "tools assembled"
        );
        Ok(set)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{Tool, ToolSource};

    pub struct EchoTool {
        pub name: &'static str,
        pub description: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn invoke(&self, arguments: Value) -> Result<String> {
            Ok(format!("{}({arguments})", self.name))
        }
    }

    pub struct StaticSource {
        pub label: &'static str,
        pub names: Vec<(&'static str, &'static str)>,
        pub fail: bool,
    }

    #[async_trait]
    impl ToolSource for StaticSource {
        fn label(&self) -> &'static str {
            self.label
        }

        async fn load(&self) -> Result<Vec<Arc<dyn Tool>>> {
            if self.fail {
                bail!("{} source is down", self.label);
            }
            Ok(self
                .names
                .iter()
                .map(|&(name, description)| Arc::new(EchoTool { name, description }) as Arc<dyn Tool>)
                .collect())
        }
    }
}
