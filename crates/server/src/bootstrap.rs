use cafe_agent::AgentRuntime;
use cafe_core::config::{AppConfig, ConfigError};
use cafe_db::DatabaseHandle;
use thiserror::Error;
use tracing::info;

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub database: DatabaseHandle,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("agent runtime setup failed: {0:#}")]
    Runtime(#[source] anyhow::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    // The customer database is loaded on first use, not here.
    let database = DatabaseHandle::new(&config.database.script_path, config.database.timeout_secs);
    let runtime =
        AgentRuntime::from_config(&config, database.clone()).map_err(BootstrapError::Runtime)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        scanning = runtime.scanner().is_enabled(),
        mcp_servers = config.mcp.servers.len(),
        "agent runtime initialized"
    );

    Ok(Application { config, database, state: AppState::new(runtime) })
}
