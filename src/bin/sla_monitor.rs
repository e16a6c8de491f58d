//! `docflow-sla-monitor`: the standalone SLA watchdog process (C10). Not a
//! queue consumer — a single periodic scan loop against Postgres.

use docflow::config::DocflowConfig;
use docflow::server::{serve_with_graceful_shutdown, ReadinessState};
use docflow::sla_monitor;
use docflow::storage::{connect_and_migrate, DatabaseConfig};
use docflow::time_provider::production_time_provider;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DocflowConfig::from_env()?;
    docflow::observability::init(&config.log_filter, config.log_json);

    let db_config = DatabaseConfig::new(config.database_url.clone())
        .with_pool_size(config.database_pool_size);
    let pool = connect_and_migrate(&db_config).await?;

    let readiness = ReadinessState::new();
    readiness.set_ready();
    let shutdown = CancellationToken::new();

    let health_shutdown = shutdown.clone();
    let health_readiness = readiness.clone();
    let health_port = config.health_port;
    let health_task = tokio::spawn(async move {
        serve_with_graceful_shutdown(health_port, health_readiness, health_shutdown).await
    });

    let monitor_shutdown = shutdown.clone();
    let monitor_task = tokio::spawn(async move {
        sla_monitor::run(pool, production_time_provider(), monitor_shutdown).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();

    if let Err(error) = monitor_task.await {
        error!(%error, "SLA monitor task panicked");
    }
    if let Err(error) = health_task.await {
        error!(%error, "health server task panicked");
    }

    Ok(())
}
