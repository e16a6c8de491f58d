//! `extractor` stage: stub structured-data extraction. Diverts to back
//! office when confidence is below the workflow's configured threshold.

use async_trait::async_trait;
use rand::Rng;
use sqlx::{Postgres, Transaction};

use crate::envelope::{Envelope, BACKOFFICE, NEXT};
use crate::error::PipelineError;
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::{backoffice, documents};
use crate::workflow::WorkflowCatalog;

/// Stub document extractor, diverting low-confidence documents to back
/// office.
pub struct ExtractorHandler {
    catalog: WorkflowCatalog,
}

impl ExtractorHandler {
    /// Build a handler backed by `catalog`.
    #[must_use]
    pub fn new(catalog: WorkflowCatalog) -> Self {
        Self { catalog }
    }
}

fn document_id_from_message(message: &Envelope) -> Result<crate::domain_types::DocumentId, PipelineError> {
    message.document_id.ok_or_else(|| {
        use serde::de::Error;
        PipelineError::Deserialize(serde_json::Error::custom(
            "extraction message missing document_id",
        ))
    })
}

fn stub_extracted_data(doc_type: &str) -> serde_json::Value {
    match doc_type {
        "invoice" => serde_json::json!({
            "invoice_number": "INV-0001",
            "total_amount": 100.0,
            "vendor_name": "Acme Corp",
        }),
        _ => serde_json::json!({ "doc_type": doc_type }),
    }
}

#[async_trait]
impl StageHandler for ExtractorHandler {
    fn component_name(&self) -> &'static str {
        "extractor"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let document_id = document_id_from_message(message)?;
        let doc_type = message
            .payload
            .get("doc_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let stage_name = message.current_stage.clone().ok_or_else(|| {
            crate::error::RoutingError::UnresolvableStage {
                workflow: message.workflow_name.clone(),
                component: self.component_name().to_string(),
            }
        })?;
        let stage_def = self
            .catalog
            .stage_by_name(&message.workflow_name, &stage_name)?;
        let threshold = stage_def.confidence_threshold.unwrap_or(0.75);

        let confidence: f64 = rand::thread_rng().gen_range(0.50..=1.0);

        let mut outgoing = message.clone();
        outgoing.source_component = Some(self.component_name().to_string());

        if confidence < threshold {
            backoffice::insert(
                tx,
                message.request_id,
                backoffice::TaskType::Extraction,
                *document_id.as_ref(),
                5,
                serde_json::json!({
                    "doc_type": doc_type,
                    "confidence": confidence,
                    "extracted_data": stub_extracted_data(&doc_type),
                }),
                message.deadline_utc,
                &[],
                self.component_name(),
                message.workflow_name.as_ref(),
            )
            .await?;
            outgoing.payload = serde_json::json!({
                "doc_type": doc_type,
                "confidence": confidence,
                "extracted_data": stub_extracted_data(&doc_type),
            });
            Ok(vec![(BACKOFFICE.to_string(), outgoing)])
        } else {
            let extracted = stub_extracted_data(&doc_type);
            documents::record_extraction(tx, document_id, extracted, confidence as f32).await?;
            Ok(vec![(NEXT.to_string(), outgoing)])
        }
    }
}
