//! Broker topology manager (C3): declares exchanges, queues, bindings,
//! dead-letter routing, and per-queue TTL against a real AMQP broker.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use crate::domain_types::MessageTtlMs;
use crate::error::BrokerError;

/// Direct exchange carrying all intra-pipeline routing.
pub const EXCHANGE_PIPELINE: &str = "doc.direct";
/// Direct exchange carrying human-operator work.
pub const EXCHANGE_BACKOFFICE: &str = "doc.backoffice";
/// Fan-out exchange behind every queue's dead-letter argument.
pub const EXCHANGE_DLX: &str = "doc.dlx";

/// Header added to a redelivered message tracking how many times it has
/// been negatively acknowledged with requeue, per SPEC_FULL §3's
/// retry-count extension (flagged as an implementer's choice in spec §9).
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// One queue to declare, with the exchange/key it binds to.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    /// Queue name, `q.<component>` or `q.backoffice.<task_type>`.
    pub queue: &'static str,
    /// Exchange the queue binds to.
    pub exchange: &'static str,
    /// Concrete routing key bound; `"#"` for the catch-all DLQ binding.
    pub routing_key: &'static str,
}

/// The default workflow's fixed bindings (spec §6 table), plus the
/// back-office and dead-letter queues that exist regardless of which
/// workflow is active.
pub const DEFAULT_BINDINGS: &[QueueBinding] = &[
    QueueBinding { queue: "q.workflow_router", exchange: EXCHANGE_PIPELINE, routing_key: "request.new" },
    QueueBinding { queue: "q.splitter", exchange: EXCHANGE_PIPELINE, routing_key: "request.split" },
    QueueBinding { queue: "q.ocr", exchange: EXCHANGE_PIPELINE, routing_key: "page.ocr" },
    QueueBinding { queue: "q.classifier", exchange: EXCHANGE_PIPELINE, routing_key: "page.classify" },
    QueueBinding { queue: "q.classification_aggregator", exchange: EXCHANGE_PIPELINE, routing_key: "page.classified" },
    QueueBinding { queue: "q.extractor", exchange: EXCHANGE_PIPELINE, routing_key: "doc.extract" },
    QueueBinding { queue: "q.extraction_aggregator", exchange: EXCHANGE_PIPELINE, routing_key: "doc.extracted" },
    QueueBinding { queue: "q.consolidator", exchange: EXCHANGE_PIPELINE, routing_key: "request.consolidate" },
    QueueBinding { queue: "q.backoffice.classification", exchange: EXCHANGE_BACKOFFICE, routing_key: "task.classification" },
    QueueBinding { queue: "q.backoffice.extraction", exchange: EXCHANGE_BACKOFFICE, routing_key: "task.extraction" },
];

/// The dead-letter queue, bound to the fan-out DLX with no routing key.
pub const DEAD_LETTER_QUEUE: &str = "q.dead_letters";

/// Declares topology on a `lapin` channel. Declarations are idempotent —
/// safe to run on every worker startup, matching spec §4.3's requirement
/// that "startup declares all topology before any consumer begins."
pub struct Topology<'a> {
    channel: &'a Channel,
    message_ttl_ms: MessageTtlMs,
}

impl<'a> Topology<'a> {
    /// Build a topology declarer bound to `channel`, applying
    /// `message_ttl_ms` to every non-DLQ queue's dead-letter TTL argument.
    #[must_use]
    pub fn new(channel: &'a Channel, message_ttl_ms: MessageTtlMs) -> Self {
        Self { channel, message_ttl_ms }
    }

    /// Declare the three exchanges, the dead-letter queue, and every
    /// binding in `DEFAULT_BINDINGS`. Called once at worker startup.
    pub async fn declare_all(&self) -> Result<(), BrokerError> {
        self.declare_exchange(EXCHANGE_PIPELINE, ExchangeKind::Direct).await?;
        self.declare_exchange(EXCHANGE_BACKOFFICE, ExchangeKind::Direct).await?;
        self.declare_exchange(EXCHANGE_DLX, ExchangeKind::Fanout).await?;

        self.declare_dead_letter_queue().await?;

        for binding in DEFAULT_BINDINGS {
            self.declare_queue(binding.queue).await?;
            self.bind_queue(binding.queue, binding.exchange, binding.routing_key)
                .await?;
        }

        info!(
            queues = DEFAULT_BINDINGS.len() + 1,
            "broker topology declared"
        );
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    fn queue_args(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(EXCHANGE_DLX.into()),
        );
        args.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongLongInt(i64::from(self.message_ttl_ms.into_inner())),
        );
        args
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions { durable: true, ..Default::default() },
                self.queue_args(),
            )
            .await?;
        Ok(())
    }

    async fn declare_dead_letter_queue(&self) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                DEAD_LETTER_QUEUE,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        self.channel
            .queue_bind(
                DEAD_LETTER_QUEUE,
                EXCHANGE_DLX,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// Read the `x-retry-count` header off a delivery, defaulting to 0 for a
/// first attempt.
#[must_use]
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|table| table.inner().get(RETRY_COUNT_HEADER))
        .and_then(|value| match value {
            AMQPValue::LongLongInt(n) => Some(*n),
            AMQPValue::LongInt(n) => Some(i64::from(*n)),
            _ => None,
        })
        .map_or(0, |n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_count_defaults_to_zero_without_headers() {
        assert_eq!(retry_count(None), 0);
    }

    #[test]
    fn retry_count_reads_back_an_incremented_header() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from(RETRY_COUNT_HEADER), AMQPValue::LongLongInt(3));
        assert_eq!(retry_count(Some(&table)), 3);
    }

    #[test]
    fn default_bindings_cover_the_canonical_topology_table() {
        let queues: Vec<&str> = DEFAULT_BINDINGS.iter().map(|b| b.queue).collect();
        assert!(queues.contains(&"q.classification_aggregator"));
        assert!(queues.contains(&"q.extraction_aggregator"));
        assert_eq!(DEFAULT_BINDINGS.len(), 10);
    }
}
