mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::{Context, Result};
use cafe_core::config::{AppConfig, LoadOptions};
use cafe_core::logging;

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before anything else can emit events.
    let config = AppConfig::load(LoadOptions::default())?;
    logging::init(&config.logging);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "cafe-server started"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    axum::serve(listener, routes::router(app.state, app.database))
        .with_graceful_shutdown(wait_for_shutdown(grace))
        .await
        .context("serving http")?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "cafe-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown(grace: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    tracing::info!(
        event_name = "system.server.draining",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "draining in-flight requests"
    );

    // Open streams may outlive the grace period; stop waiting for them.
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!(
            event_name = "system.server.grace_elapsed",
            correlation_id = "shutdown",
            "grace period elapsed with connections still open"
        );
        std::process::exit(0);
    });
}
