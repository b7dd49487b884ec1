use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::connection::connect_with_script;
use crate::{DatabaseError, DbPool};

/// Process-wide customer database, loaded from its SQL script on first use.
///
/// Clones share the same pool. Concurrent first callers wait on a single
/// initialization; a failed load leaves the cell empty so the next call retries.
#[derive(Clone, Debug)]
pub struct DatabaseHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    script_path: PathBuf,
    timeout_secs: u64,
    pool: OnceCell<DbPool>,
}

impl DatabaseHandle {
    pub fn new(script_path: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                script_path: script_path.into(),
                timeout_secs,
                pool: OnceCell::new(),
            }),
        }
    }

    /// Wraps an already-populated pool.
    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                script_path: PathBuf::new(),
                timeout_secs: 30,
                pool: OnceCell::new_with(Some(pool)),
            }),
        }
    }

    pub async fn pool(&self) -> Result<&DbPool, DatabaseError> {
        self.inner
            .pool
            .get_or_try_init(|| async {
                let pool =
                    connect_with_script(&self.inner.script_path, self.inner.timeout_secs).await?;
                info!(
                    event_name = "db.customer.loaded",
                    script_path = %self.inner.script_path.display(),
                    "customer database loaded"
                );
                Ok(pool)
            })
            .await
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.pool.initialized()
    }

    pub fn script_path(&self) -> &Path {
        &self.inner.script_path
    }
}
