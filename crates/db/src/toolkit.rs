use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::{DatabaseError, DatabaseHandle};

const SAMPLE_ROWS: usize = 3;
const READ_ONLY_PREFIXES: &[&str] = &["select", "with", "pragma", "explain"];
const INTROSPECTION_PRAGMAS: &[&str] = &[
    "table_info",
    "table_xinfo",
    "table_list",
    "index_list",
    "index_info",
    "index_xinfo",
    "foreign_key_list",
    "foreign_key_check",
];

/// Introspection and read-only querying over the customer database.
#[derive(Clone, Debug)]
pub struct SqlToolkit {
    database: DatabaseHandle,
}

impl SqlToolkit {
    pub fn new(database: DatabaseHandle) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &DatabaseHandle {
        &self.database
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let pool = self.database.pool().await?;
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await?;
        Ok(tables)
    }

    /// Returns the `CREATE` statement and a few sample rows for every named table.
    pub async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError> {
        let pool = self.database.pool().await?;
        let mut sections = Vec::with_capacity(tables.len());

        for table in tables {
            let table = table.trim();
            let create_sql = sqlx::query_scalar::<_, String>(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;

            let sample_sql = format!("SELECT * FROM {} LIMIT {SAMPLE_ROWS}", quote_identifier(table));
            let rows = sqlx::query(&sample_sql).fetch_all(pool).await?;

            let mut section = format!("{}\n\n/*\n{SAMPLE_ROWS} rows from {table} table:\n", create_sql.trim());
            if let Some(first) = rows.first() {
                let header: Vec<&str> = first.columns().iter().map(|column| column.name()).collect();
                section.push_str(&header.join("\t"));
                section.push('\n');
            }
            for row in &rows {
                let cells = (0..row.len())
                    .map(|index| column_value(row, index).map(|value| render_cell(&value)))
                    .collect::<Result<Vec<_>, _>>()?;
                section.push_str(&cells.join("\t"));
                section.push('\n');
            }
            section.push_str("*/");
            sections.push(section);
        }

        Ok(sections.join("\n\n"))
    }

    /// Runs a single read-only statement and returns each row as a JSON object.
    pub async fn run_query(&self, sql: &str) -> Result<Vec<Map<String, Value>>, DatabaseError> {
        let statement = read_only_statement(sql)?;
        let pool = self.database.pool().await?;
        let rows = sqlx::query(statement).fetch_all(pool).await?;

        rows.iter()
            .map(|row| {
                let mut object = Map::new();
                for (index, column) in row.columns().iter().enumerate() {
                    object.insert(column.name().to_string(), column_value(row, index)?);
                }
                Ok::<_, DatabaseError>(object)
            })
            .collect()
    }

    /// Validates a statement against the query planner without running it.
    pub async fn check_query(&self, sql: &str) -> Result<String, DatabaseError> {
        let statement = read_only_statement(sql)?;
        let pool = self.database.pool().await?;
        let explain = if statement.to_ascii_lowercase().starts_with("explain") {
            statement.to_string()
        } else {
            format!("EXPLAIN {statement}")
        };
        sqlx::query(&explain)
            .fetch_all(pool)
            .await
            .map_err(|error| DatabaseError::InvalidQuery(error.to_string()))?;
        Ok(statement.to_string())
    }
}

fn read_only_statement(sql: &str) -> Result<&str, DatabaseError> {
    let statement = sql.trim().trim_end_matches(';').trim();
    if statement.is_empty() {
        return Err(DatabaseError::InvalidQuery("query is empty".to_string()));
    }
    if statement.contains(';') {
        return Err(DatabaseError::InvalidQuery(
            "only a single statement may be executed".to_string(),
        ));
    }

    let keyword = statement
        .split(|ch: char| ch.is_whitespace() || ch == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !READ_ONLY_PREFIXES.contains(&keyword.as_str()) {
        return Err(DatabaseError::ReadOnly(keyword));
    }
    if keyword == "pragma" && !read_only_pragma(statement) {
        return Err(DatabaseError::ReadOnly(statement.to_string()));
    }
    Ok(statement)
}

/// Bare pragma reads pass; arguments are only accepted for schema introspection.
fn read_only_pragma(statement: &str) -> bool {
    let body = statement["pragma".len()..].trim();
    if body.contains('=') {
        return false;
    }
    match body.split_once('(') {
        None => true,
        Some((name, _)) => {
            let name = name.trim().rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
            INTROSPECTION_PRAGMAS.contains(&name.as_str())
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => row.try_get::<i64, _>(index).map(Value::from),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row.try_get::<f64, _>(index).map(Value::from),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len()))),
        _ => row.try_get::<String, _>(index).map(Value::String),
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
