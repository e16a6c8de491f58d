//! `docflow-ingress`: serves the external submission/status HTTP surface
//! (C13) — the one way a request enters the pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use docflow::config::DocflowConfig;
use docflow::ingress_http::{router, IngressState};
use docflow::runtime::{connect_broker, prepare_channel};
use docflow::storage::{connect_and_migrate, DatabaseConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DocflowConfig::from_env()?;
    docflow::observability::init(&config.log_filter, config.log_json);

    let db_config = DatabaseConfig::new(config.database_url.clone())
        .with_pool_size(config.database_pool_size);
    let pool = connect_and_migrate(&db_config).await?;

    let connection = connect_broker(&config).await?;
    let channel = prepare_channel(&connection, &config).await?;

    let state = IngressState { pool, channel: Arc::new(channel) };
    let app = router(state);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_shutdown.cancel();
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "ingress HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
