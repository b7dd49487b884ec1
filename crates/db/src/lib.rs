pub mod connection;
pub mod handle;
pub mod toolkit;

use std::path::PathBuf;

use thiserror::Error;

pub use connection::{connect_in_memory, connect_with_script, load_script, DbPool};
pub use handle::DatabaseHandle;
pub use toolkit::SqlToolkit;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("could not read database script `{path}`: {source}")]
    ScriptRead { path: PathBuf, source: std::io::Error },
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("table `{0}` does not exist")]
    UnknownTable(String),
    #[error("only read-only statements are allowed, got `{0}`")]
    ReadOnly(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
