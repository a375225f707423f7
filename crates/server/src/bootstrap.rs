use std::sync::Arc;

use tallyflow_core::config::{AppConfig, ConfigError};
use tallyflow_core::currency::StaticRateConverter;
use tallyflow_db::{connect_with_settings, migrations, DbPool, ExpenseService};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: ExpenseService,
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

/// Connects, migrates and wires the expense service from an already loaded config.
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

    let converter = Arc::new(StaticRateConverter::new(config.currency.rates.clone()));
    let service =
        ExpenseService::new(db_pool.clone(), converter, config.workflow.conditional_approval);
    info!(
        event_name = "system.bootstrap.service_ready",
        correlation_id = "bootstrap",
        conditional_approval = config.workflow.conditional_approval.as_str(),
        exchange_rates = config.currency.rates.len(),
        "expense service initialized"
    );

    Ok(Application { config, db_pool, service })
}
