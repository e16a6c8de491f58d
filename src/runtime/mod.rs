//! Stage worker runtime (C5): the per-stage processing contract shared by
//! every worker binary — consume, deserialize, open a transaction, invoke
//! stage logic, commit, publish, ack. Commit-before-publish is the
//! load-bearing correctness property of this module (spec §9) and must
//! never be reordered.

pub mod stages;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use sqlx::{Postgres, Transaction};
use tokio_executor_trait::Tokio as TokioExecutor;
use tokio_reactor_trait::Tokio as TokioReactor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::broker::topology::{retry_count, Topology, RETRY_COUNT_HEADER};
use crate::broker::{self};
use crate::config::DocflowConfig;
use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::lifecycle::{self, RequestStatus};
use crate::routing::{self, Resolution};
use crate::server::ReadinessState;
use crate::storage::{requests, DbPool};
use crate::workflow::WorkflowCatalog;

/// One or more `(routing_key, outgoing_message)` pairs a stage handler
/// returns; routing keys may be sentinels (`NEXT`, `BACKOFFICE`) or
/// literals (spec §4.4).
pub type StageOutput = Vec<(String, Envelope)>;

/// The single capability every stage shares: "consume one envelope,
/// return outgoing pairs, within a caller-provided transaction" (spec
/// §9). A trait object, not an inheritance hierarchy — there is no shared
/// domain abstraction beyond this, only connection-setup code reuse.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Name of the worker/component this handler implements, matching a
    /// `StageDef::component` value in the active workflow.
    fn component_name(&self) -> &'static str;

    /// Process one envelope within `tx`. Must not publish or ack itself;
    /// the runtime does both, after commit, per the processing contract.
    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError>;
}

/// Everything a running worker needs, built once at startup and shared
/// across every delivery.
pub struct WorkerContext {
    /// Stage business logic.
    pub handler: Arc<dyn StageHandler>,
    /// Postgres pool backing every per-message transaction.
    pub pool: DbPool,
    /// Cached workflow definitions.
    pub catalog: WorkflowCatalog,
    /// Resolved process configuration.
    pub config: DocflowConfig,
}

/// Connect to the configured broker, applying the executor/reactor
/// adapters so `lapin`'s internal tasks run on the ambient Tokio runtime.
pub async fn connect_broker(config: &DocflowConfig) -> Result<Connection, lapin::Error> {
    let options = ConnectionProperties::default()
        .with_executor(TokioExecutor::current())
        .with_reactor(TokioReactor);
    Connection::connect(&config.rabbitmq_url, options).await
}

/// Run a worker consuming from `queue_name` until `shutdown` is
/// cancelled. This is the generic loop every `docflow-worker` process
/// drives; which queue, handler, and routing-key-to-ack policy apply is
/// entirely determined by `context.handler` and the active workflow.
#[instrument(skip(context, channel, shutdown, readiness), fields(component = context.handler.component_name()))]
pub async fn run_worker(
    context: Arc<WorkerContext>,
    channel: Channel,
    queue_name: &str,
    shutdown: CancellationToken,
    readiness: ReadinessState,
) -> Result<(), PipelineError> {
    channel
        .basic_qos(
            u16::try_from(context.config.prefetch_count.into_inner()).unwrap_or(u16::MAX),
            BasicQosOptions::default(),
        )
        .await
        .map_err(crate::error::BrokerError::from)?;

    let mut consumer = channel
        .basic_consume(
            queue_name,
            context.handler.component_name(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(crate::error::BrokerError::from)?;

    readiness.set_ready();
    info!(queue = queue_name, "worker ready, consuming");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                readiness.set_not_ready();
                info!("shutdown requested, stopping consumption");
                break;
            }
            delivery = consumer.next() => {
                let Some(delivery) = delivery else {
                    warn!("consumer stream ended unexpectedly");
                    break;
                };
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(error) => {
                        error!(%error, "failed to receive delivery");
                        continue;
                    }
                };

                let headers = delivery.properties.headers().clone();
                let retries = retry_count(headers.as_ref());
                let max_retries = context.config.max_redeliveries.into_inner();

                match process_one(&context, &channel, &delivery.data).await {
                    Ok(()) => {
                        if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
                            error!(%error, "failed to ack delivery");
                        }
                    }
                    Err(error) if error.is_permanent() => {
                        warn!(%error, "permanent failure, routing to DLQ without requeue");
                        mark_request_failed(&context.pool, &delivery.data, &error).await;
                        if let Err(nack_error) = delivery
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await
                        {
                            error!(%nack_error, "failed to nack delivery");
                        }
                    }
                    Err(error) if retries < max_retries => {
                        warn!(%error, retries, max_retries, "transient failure, requeuing with incremented retry count");
                        if let Err(nack_error) = delivery
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await
                        {
                            error!(%nack_error, "failed to nack delivery before manual requeue");
                        } else if let Err(publish_error) =
                            requeue_with_incremented_retry_count(&channel, queue_name, &delivery.data, retries + 1).await
                        {
                            error!(%publish_error, "failed to republish delivery for retry");
                        }
                    }
                    Err(error) => {
                        warn!(%error, retries, max_retries, "retry ceiling reached, routing to DLQ");
                        mark_request_failed(&context.pool, &delivery.data, &error).await;
                        if let Err(nack_error) = delivery
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await
                        {
                            error!(%nack_error, "failed to nack delivery");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Republish `body` straight onto `queue_name` (default exchange, routing
/// key = queue name) with `x-retry-count` set to `new_count`. A `nack`
/// with `requeue: true` redelivers the message unchanged — the broker has
/// no concept of a retry-count header — so bumping the counter requires
/// this manual nack-then-republish sequence instead (SPEC_FULL §3's
/// retry-count extension).
async fn requeue_with_incremented_retry_count(
    channel: &Channel,
    queue_name: &str,
    body: &[u8],
    new_count: u32,
) -> Result<(), lapin::Error> {
    use lapin::options::BasicPublishOptions;
    use lapin::types::{AMQPValue, FieldTable as AmqpFieldTable, ShortString};
    use lapin::BasicProperties;

    let mut headers = AmqpFieldTable::default();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(i64::from(new_count)),
    );

    channel
        .basic_publish(
            "",
            queue_name,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_delivery_mode(2)
                .with_headers(headers),
        )
        .await?
        .await?;
    Ok(())
}

/// Best-effort: mark the envelope's owning request `failed`, going through
/// the C11 transition guard so a request already in a terminal status is
/// left alone. A delivery that fails to deserialize at all carries no
/// recoverable `request_id`, so there is nothing to mark.
async fn mark_request_failed(pool: &DbPool, body: &[u8], error: &PipelineError) {
    let Ok(message) = serde_json::from_slice::<Envelope>(body) else {
        return;
    };

    let outcome: Result<(), PipelineError> = async {
        let mut tx = pool.begin().await.map_err(crate::error::StorageError::from)?;
        let current = requests::find_tx(&mut tx, message.request_id).await?;
        let to = lifecycle::transition_to(message.request_id, current.status.0, RequestStatus::Failed)?;
        requests::set_status(&mut tx, message.request_id, to, Some(&error.to_string())).await?;
        tx.commit().await.map_err(crate::error::StorageError::from)?;
        Ok(())
    }
    .await;

    if let Err(mark_error) = outcome {
        warn!(request_id = %message.request_id, %mark_error, "failed to mark request as failed");
    }
}

async fn process_one(
    context: &WorkerContext,
    channel: &Channel,
    body: &[u8],
) -> Result<(), PipelineError> {
    let message: Envelope = serde_json::from_slice(body)?;

    let mut tx = context.pool.begin().await.map_err(crate::error::StorageError::from)?;
    let outputs = context.handler.handle(&mut tx, &message).await?;
    tx.commit().await.map_err(crate::error::StorageError::from)?;

    // Publish happens strictly after commit: this ordering turns
    // at-least-once delivery into at-least-once-with-monotonic-state.
    for (routing_key, outgoing) in outputs {
        publish_resolved(context, channel, &outgoing, &routing_key).await?;
    }

    Ok(())
}

async fn publish_resolved(
    context: &WorkerContext,
    channel: &Channel,
    message: &Envelope,
    routing_key: &str,
) -> Result<(), PipelineError> {
    match routing::resolve(
        &context.catalog,
        message,
        context.handler.component_name(),
        routing_key,
    )? {
        Resolution::Terminal => Ok(()),
        Resolution::Publish(destination) => {
            let exchange = match destination.exchange {
                routing::Exchange::Pipeline => broker::topology::EXCHANGE_PIPELINE,
                routing::Exchange::Backoffice => broker::topology::EXCHANGE_BACKOFFICE,
            };
            broker::publish(
                channel,
                exchange,
                destination.routing_key.as_ref(),
                &destination.message,
                context.handler.component_name(),
            )
            .await
            .map_err(PipelineError::from)
        }
    }
}

/// Declare topology and return a fresh channel ready to consume, the
/// standard worker-startup sequence (spec §4.3: "startup declares all
/// topology before any consumer begins").
pub async fn prepare_channel(
    connection: &Connection,
    config: &DocflowConfig,
) -> Result<Channel, PipelineError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(crate::error::BrokerError::from)?;
    let topology = Topology::new(&channel, config.message_ttl_ms);
    topology.declare_all().await?;
    Ok(channel)
}

