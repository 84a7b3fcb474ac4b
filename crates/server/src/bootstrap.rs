use std::sync::Arc;

use haulr_core::config::{AppConfig, ConfigError, LoadOptions};
use haulr_core::LifecycleEngine;
use haulr_db::{connect_with_settings, migrations, DbPool, SqlLifecycleStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: LifecycleEngine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = LifecycleEngine::new(
        Arc::new(SqlLifecycleStore::new(db_pool.clone()).with_outbox()),
        config.policy.clone(),
    )
    .with_max_conflict_retries(config.engine.max_conflict_retries);

    Ok(Application { config, db_pool, engine })
}

#[cfg(test)]
mod tests {
    use haulr_core::config::{ConfigOverrides, LoadOptions};
    use haulr_core::{CustomerId, Location, RequestDetails, RequestStatus};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_policy_before_touching_the_database() {
        let mut options = overrides("sqlite::memory:");
        options.overrides.quote_ttl_minutes = Some(0);

        let result = bootstrap(options).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("policy.quote_ttl_minutes"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_schema_and_wires_a_working_engine() {
        let app = bootstrap(overrides("sqlite::memory:"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('service_request', 'quote', 'counter_offer', 'request_status_history', 'notification_outbox')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("lifecycle tables should exist after bootstrap");
        assert_eq!(table_count, 5);

        let request = app
            .engine
            .submit(
                CustomerId("C-100".to_string()),
                RequestDetails {
                    service_type: "fuel_delivery".to_string(),
                    description: "Ran out of fuel on the bypass".to_string(),
                    location: Location {
                        address: "Northbound bypass, marker 12".to_string(),
                        latitude: None,
                        longitude: None,
                    },
                    is_emergency: false,
                    budget_range: None,
                    preferred_date: None,
                    preferred_time: None,
                },
            )
            .await
            .expect("submit");
        assert_eq!(request.status, RequestStatus::Pending);

        let (outbox_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notification_outbox")
            .fetch_one(&app.db_pool)
            .await
            .expect("outbox count");
        assert!(outbox_rows >= 1, "submission should be announced through the outbox");

        app.db_pool.close().await;
    }
}
