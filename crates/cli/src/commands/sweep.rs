use std::sync::Arc;

use haulr_core::config::{AppConfig, LogFormat};
use haulr_core::{ExpirySweeper, LifecycleEngine};
use haulr_db::SqlLifecycleStore;

use crate::commands::{connect_and_migrate, current_thread_runtime, load_config, CommandResult};

/// One sweep pass against the configured database, independent of whether
/// the background sweeper is enabled.
pub fn run(batch_size: Option<u32>) -> CommandResult {
    let mut config = match load_config("sweep") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    if let Some(batch_size) = batch_size {
        if batch_size == 0 {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                "--batch-size must be greater than zero",
                2,
            );
        }
        config.sweeper.batch_size = batch_size;
    }
    init_stderr_logging(&config);

    let runtime = match current_thread_runtime("sweep") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, _) = connect_and_migrate(&config).await?;
        let engine = LifecycleEngine::new(
            Arc::new(SqlLifecycleStore::new(pool.clone()).with_outbox()),
            config.policy.clone(),
        )
        .with_max_conflict_retries(config.engine.max_conflict_retries);

        let report = ExpirySweeper::new(engine, &config.sweeper)
            .sweep_once()
            .await
            .map_err(|error| ("sweep", error.to_string(), 6u8));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => {
            let details = serde_json::to_value(&report).ok();
            CommandResult::success_with_details(
                "sweep",
                format!("sweep pass applied {} transition(s)", report.transitions()),
                details,
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}

// stdout carries the JSON result, so engine events go to stderr.
fn init_stderr_logging(config: &AppConfig) {
    use tracing::Level;

    let level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}
