mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use haulr_core::config::{AppConfig, LoadOptions};
use haulr_core::ExpirySweeper;
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use haulr_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before bootstrap so its events are visible.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = if app.config.sweeper.enabled {
        let sweeper = ExpirySweeper::new(app.engine.clone(), &app.config.sweeper);
        Some(tokio::spawn(sweeper.run(shutdown_rx)))
    } else {
        tracing::info!(
            event_name = "system.sweeper.disabled",
            correlation_id = "bootstrap",
            "expiry sweeper disabled by configuration"
        );
        None
    };

    let router = api::router(app.engine.clone()).merge(health::router(app.db_pool.clone()));
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        sweeper_enabled = app.config.sweeper.enabled,
        "haulr-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "haulr-server stopping"
    );

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!(
                event_name = "system.sweeper.shutdown_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "expiry sweeper did not stop within the grace period"
            );
        }
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
