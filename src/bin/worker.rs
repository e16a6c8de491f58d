//! `docflow-worker`: a single-stage queue consumer. Which stage it runs is
//! selected by `DOCPROC_COMPONENT_NAME` (or `--component`), letting the
//! same binary image back every queue in the topology — only the
//! orchestrator's pod spec differs per deployment.

use std::sync::Arc;

use clap::Parser;
use docflow::config::DocflowConfig;
use docflow::runtime::stages::classification_aggregator::ClassificationAggregatorHandler;
use docflow::runtime::stages::classifier::ClassifierHandler;
use docflow::runtime::stages::consolidator::ConsolidatorHandler;
use docflow::runtime::stages::extraction_aggregator::ExtractionAggregatorHandler;
use docflow::runtime::stages::extractor::ExtractorHandler;
use docflow::runtime::stages::ocr::OcrHandler;
use docflow::runtime::stages::splitter::SplitterHandler;
use docflow::runtime::stages::workflow_router::WorkflowRouterHandler;
use docflow::runtime::{connect_broker, prepare_channel, run_worker, StageHandler, WorkerContext};
use docflow::server::{serve_with_graceful_shutdown, ReadinessState};
use docflow::storage::{connect_and_migrate, DatabaseConfig};
use docflow::workflow::WorkflowCatalog;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "docflow-worker")]
struct Args {
    /// Which stage to run; overrides `DOCPROC_COMPONENT_NAME` if set.
    #[arg(long)]
    component: Option<String>,
}

fn build_handler(component: &str, catalog: WorkflowCatalog) -> Option<Arc<dyn StageHandler>> {
    match component {
        "workflow_router" => Some(Arc::new(WorkflowRouterHandler::new(catalog))),
        "splitter" => Some(Arc::new(SplitterHandler)),
        "ocr" => Some(Arc::new(OcrHandler)),
        "classifier" => Some(Arc::new(ClassifierHandler::new(catalog))),
        "classification_aggregator" => Some(Arc::new(ClassificationAggregatorHandler)),
        "extractor" => Some(Arc::new(ExtractorHandler::new(catalog))),
        "extraction_aggregator" => Some(Arc::new(ExtractionAggregatorHandler)),
        "consolidator" => Some(Arc::new(ConsolidatorHandler)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = DocflowConfig::from_env()?;
    docflow::observability::init(&config.log_filter, config.log_json);

    let component = args
        .component
        .or_else(|| config.component_name.clone())
        .ok_or_else(|| anyhow::anyhow!("no component selected: set DOCPROC_COMPONENT_NAME or pass --component"))?;

    let catalog = WorkflowCatalog::new(&config.workflows_dir);
    let handler = build_handler(&component, catalog.clone())
        .ok_or_else(|| anyhow::anyhow!("unknown component: {component}"))?;

    let db_config = DatabaseConfig::new(config.database_url.clone())
        .with_pool_size(config.database_pool_size);
    let pool = connect_and_migrate(&db_config).await?;
    let connection = connect_broker(&config).await?;
    let channel = prepare_channel(&connection, &config).await?;

    let queue_name = format!("q.{component}");
    let readiness = ReadinessState::new();
    let shutdown = CancellationToken::new();

    let context = Arc::new(WorkerContext { handler, pool, catalog, config: config.clone() });

    let health_port = config.health_port;
    let health_shutdown = shutdown.clone();
    let health_readiness = readiness.clone();
    let health_task =
        tokio::spawn(
            async move { serve_with_graceful_shutdown(health_port, health_readiness, health_shutdown).await },
        );

    let worker_shutdown = shutdown.clone();
    let worker_task = tokio::spawn(async move {
        run_worker(context, channel, &queue_name, worker_shutdown, readiness).await
    });

    wait_for_shutdown_signal().await;
    info!(component = %component, "shutdown signal received");
    shutdown.cancel();

    if let Err(error) = worker_task.await {
        error!(%error, "worker task panicked");
    }
    if let Err(error) = health_task.await {
        error!(%error, "health server task panicked");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
