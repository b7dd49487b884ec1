use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use crate::DatabaseError;

pub type DbPool = sqlx::SqlitePool;

/// Opens a private in-memory database behind a single connection that is
/// never recycled, so everything loaded into it stays visible to later queries.
pub async fn connect_in_memory(timeout_secs: u64) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect("sqlite::memory:")
        .await
}

pub async fn load_script(pool: &DbPool, script_path: &Path) -> Result<(), DatabaseError> {
    let script = tokio::fs::read_to_string(script_path).await.map_err(|source| {
        DatabaseError::ScriptRead { path: script_path.to_path_buf(), source }
    })?;

    sqlx::raw_sql(&script).execute(pool).await?;
    Ok(())
}

/// Seeds a fresh in-memory database and then locks its connection against
/// writes for the rest of the process.
pub async fn connect_with_script(
    script_path: &Path,
    timeout_secs: u64,
) -> Result<DbPool, DatabaseError> {
    let pool = connect_in_memory(timeout_secs).await?;
    load_script(&pool, script_path).await?;
    sqlx::query("PRAGMA query_only = ON").execute(&pool).await?;
    Ok(pool)
}
