//! `extraction_aggregator` stage: the fan-in primitive (C6) applied to the
//! extraction stage; finalization hands a single message to the
//! consolidator.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::error;

use crate::domain_types::StageName;
use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::runtime::stages::classification_aggregator::EXTRACTION_STAGE;
use crate::runtime::stages::{CONSOLIDATE_ROUTING_KEY, CONSOLIDATOR_STAGE};
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::aggregation::{self, IncrementOutcome};

/// Extraction fan-in.
pub struct ExtractionAggregatorHandler;

#[async_trait]
impl StageHandler for ExtractionAggregatorHandler {
    fn component_name(&self) -> &'static str {
        "extraction_aggregator"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let document_id = message.document_id.ok_or_else(|| {
            crate::error::RoutingError::UnresolvableStage {
                workflow: message.workflow_name.clone(),
                component: self.component_name().to_string(),
            }
        })?;

        let outcome = aggregation::increment(
            tx,
            message.request_id,
            EXTRACTION_STAGE,
            *document_id.as_ref(),
        )
        .await?;

        match outcome {
            IncrementOutcome::RowMissing => {
                error!(request_id = %message.request_id, "extraction aggregation row missing");
                Ok(vec![])
            }
            IncrementOutcome::DuplicateIgnored | IncrementOutcome::StillWaiting => Ok(vec![]),
            IncrementOutcome::JustCompleted => {
                let mut outgoing = message.clone();
                outgoing.document_id = None;
                outgoing.current_stage =
                    Some(StageName::try_new(CONSOLIDATOR_STAGE).expect("valid"));
                outgoing.source_component = Some(self.component_name().to_string());
                outgoing.payload = serde_json::json!({});
                Ok(vec![(CONSOLIDATE_ROUTING_KEY.to_string(), outgoing)])
            }
        }
    }
}
