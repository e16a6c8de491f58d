//! `consolidator` stage (C9): terminal. Assembles a single result
//! artifact and closes the request; emits no outgoing messages.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::{documents, requests};

/// Terminal stage: assembles `result_payload` and marks the request and
/// its documents complete.
pub struct ConsolidatorHandler;

#[async_trait]
impl StageHandler for ConsolidatorHandler {
    fn component_name(&self) -> &'static str {
        "consolidator"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let request = requests::find_tx(tx, message.request_id).await?;
        let docs = documents::list_for_request(tx, message.request_id).await?;

        let document_summaries: Vec<serde_json::Value> = docs
            .iter()
            .map(|doc| {
                serde_json::json!({
                    "id": doc.id.as_ref(),
                    "doc_type": doc.doc_type,
                    "page_indices": doc.page_indices,
                    "extracted_data": doc.extracted_data,
                })
            })
            .collect();

        let result_payload = serde_json::json!({
            "total_pages": request.page_count.unwrap_or(0),
            "total_documents": docs.len(),
            "documents": document_summaries,
        });

        documents::complete_all_for_request(tx, message.request_id).await?;
        requests::complete(tx, message.request_id, result_payload).await?;

        Ok(vec![])
    }
}
