//! `classifier` stage: stub classification. Assigns a stub `doc_type`
//! and confidence; diverts to back office when confidence is below the
//! workflow's configured threshold.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::{Postgres, Transaction};

use crate::envelope::{Envelope, BACKOFFICE, NEXT};
use crate::error::PipelineError;
use crate::runtime::stages::page_id_from_payload;
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::{backoffice, pages};
use crate::workflow::WorkflowCatalog;

const STUB_DOC_TYPES: &[&str] = &["invoice", "id_card", "payslip", "receipt", "contract"];

/// Stub page classifier, diverting low-confidence pages to back office.
pub struct ClassifierHandler {
    catalog: WorkflowCatalog,
}

impl ClassifierHandler {
    /// Build a handler backed by `catalog`.
    #[must_use]
    pub fn new(catalog: WorkflowCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StageHandler for ClassifierHandler {
    fn component_name(&self) -> &'static str {
        "classifier"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let page_id = page_id_from_payload(message)?;
        let stage_name = message.current_stage.clone().ok_or_else(|| {
            crate::error::RoutingError::UnresolvableStage {
                workflow: message.workflow_name.clone(),
                component: self.component_name().to_string(),
            }
        })?;
        let stage_def = self
            .catalog
            .stage_by_name(&message.workflow_name, &stage_name)?;
        let threshold = stage_def.confidence_threshold.unwrap_or(0.80);

        let mut rng = rand::thread_rng();
        let doc_type = *STUB_DOC_TYPES.choose(&mut rng).unwrap_or(&"invoice");
        let confidence: f64 = rng.gen_range(0.50..=1.0);

        let mut outgoing = message.clone();
        outgoing.source_component = Some(self.component_name().to_string());

        // Record the best-guess classification regardless of which branch
        // follows, so it is visible even while a diverted page is still
        // sitting in back office awaiting an operator.
        pages::record_classification(tx, page_id, doc_type, confidence as f32).await?;

        if confidence < threshold {
            backoffice::insert(
                tx,
                message.request_id,
                backoffice::TaskType::Classification,
                *page_id.as_ref(),
                5,
                serde_json::json!({ "doc_type": doc_type, "confidence": confidence }),
                message.deadline_utc,
                &[],
                self.component_name(),
                message.workflow_name.as_ref(),
            )
            .await?;
            outgoing.payload = serde_json::json!({
                "doc_type": doc_type,
                "confidence": confidence,
                "page_id": page_id.as_ref(),
            });
            Ok(vec![(BACKOFFICE.to_string(), outgoing)])
        } else {
            Ok(vec![(NEXT.to_string(), outgoing)])
        }
    }
}
