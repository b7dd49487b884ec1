use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cafe_db::SqlToolkit;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolSource};

pub const LIST_TABLES: &str = "sql_db_list_tables";
pub const SCHEMA: &str = "sql_db_schema";
pub const QUERY: &str = "sql_db_query";
pub const QUERY_CHECKER: &str = "sql_db_query_checker";

/// Provides the four customer-database tools, loading the database on first use.
#[derive(Clone, Debug)]
pub struct DatabaseToolSource {
    toolkit: SqlToolkit,
}

impl DatabaseToolSource {
    pub fn new(toolkit: SqlToolkit) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl ToolSource for DatabaseToolSource {
    fn label(&self) -> &'static str {
        "database"
    }

    async fn load(&self) -> Result<Vec<Arc<dyn Tool>>> {
        self.toolkit.database().pool().await?;

        let tool = |operation| {
            Arc::new(SqlTool::new(operation, self.toolkit.clone())) as Arc<dyn Tool>
        };
        Ok(vec![
            tool(SqlOperation::ListTables),
            tool(SqlOperation::Schema),
            tool(SqlOperation::Query),
            tool(SqlOperation::QueryChecker),
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlOperation {
    ListTables,
    Schema,
    Query,
    QueryChecker,
}

#[derive(Clone, Debug)]
pub struct SqlTool {
    operation: SqlOperation,
    toolkit: SqlToolkit,
}

impl SqlTool {
    pub fn new(operation: SqlOperation, toolkit: SqlToolkit) -> Self {
        Self { operation, toolkit }
    }
}

#[async_trait]
impl Tool for SqlTool {
    fn name(&self) -> &str {
        match self.operation {
            SqlOperation::ListTables => LIST_TABLES,
            SqlOperation::Schema => SCHEMA,
            SqlOperation::Query => QUERY,
            SqlOperation::QueryChecker => QUERY_CHECKER,
        }
    }

    fn description(&self) -> &str {
        match self.operation {
            SqlOperation::ListTables => {
                "Input is an empty string, output is a comma-separated list of tables in the database."
            }
            SqlOperation::Schema => {
                "Input to this tool is a comma-separated list of tables, output is the schema and sample rows for those tables. Be sure that the tables actually exist by calling sql_db_list_tables first! Example Input: table1, table2, table3"
            }
            SqlOperation::Query => {
                "Input to this tool is a detailed and correct SQL query, output is a result from the database. If the query is not correct, an error message will be returned. If an error is returned, rewrite the query, check the query, and try again. If you encounter an issue with an unknown column, use sql_db_schema to query the correct table fields."
            }
            SqlOperation::QueryChecker => {
                "Use this tool to double check if your query is correct before executing it. Always use this tool before executing a query with sql_db_query!"
            }
        }
    }

    fn parameters(&self) -> Value {
        match self.operation {
            SqlOperation::ListTables => json!({"type": "object", "properties": {}}),
            SqlOperation::Schema => json!({
                "type": "object",
                "properties": {
                    "table_names": {
                        "type": "string",
                        "description": "Comma-separated list of table names"
                    }
                },
                "required": ["table_names"]
            }),
            SqlOperation::Query | SqlOperation::QueryChecker => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "A single SQLite query"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        match self.operation {
            SqlOperation::ListTables => Ok(self.toolkit.list_tables().await?.join(", ")),
            SqlOperation::Schema => {
                let tables: Vec<String> = string_argument(&arguments, "table_names")?
                    .split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect();
                Ok(self.toolkit.table_info(&tables).await?)
            }
            SqlOperation::Query => {
                let rows = self.toolkit.run_query(&string_argument(&arguments, "query")?).await?;
                Ok(serde_json::to_string(&rows)?)
            }
            SqlOperation::QueryChecker => {
                Ok(self.toolkit.check_query(&string_argument(&arguments, "query")?).await?)
            }
        }
    }
}

/// Accepts `{"key": "..."}` or a bare JSON string.
fn string_argument(arguments: &Value, key: &str) -> Result<String> {
    match arguments {
        Value::String(text) => Ok(text.clone()),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("missing string argument `{key}`")),
        other => Err(anyhow!("expected an object with `{key}`, got {other}")),
    }
}
