//! `classification_aggregator` stage: the fan-in primitive (C6) applied
//! to the classification stage, whose finalization performs classification
//! grouping (C8) — reducing classified pages to contiguous same-type
//! runs and materializing `Document`s.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::error;

use crate::domain_types::StageName;
use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::runtime::stages::{
    page_id_from_payload, CONSOLIDATE_ROUTING_KEY, CONSOLIDATOR_STAGE, EXTRACTOR_STAGE,
    EXTRACT_ROUTING_KEY,
};
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::aggregation::{self, IncrementOutcome};
use crate::storage::{documents, pages, requests};

/// Fan-in stage name the extraction aggregator counts against.
pub const EXTRACTION_STAGE: &str = "extraction";

/// Classification fan-in + grouping.
pub struct ClassificationAggregatorHandler;

#[async_trait]
impl StageHandler for ClassificationAggregatorHandler {
    fn component_name(&self) -> &'static str {
        "classification_aggregator"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let page_id = page_id_from_payload(message)?;

        let outcome = aggregation::increment(
            tx,
            message.request_id,
            super::splitter::CLASSIFICATION_STAGE,
            *page_id.as_ref(),
        )
        .await?;

        match outcome {
            IncrementOutcome::RowMissing => {
                error!(request_id = %message.request_id, "classification aggregation row missing");
                Ok(vec![])
            }
            IncrementOutcome::DuplicateIgnored | IncrementOutcome::StillWaiting => Ok(vec![]),
            IncrementOutcome::JustCompleted => finalize(tx, message).await,
        }
    }
}

async fn finalize(
    tx: &mut Transaction<'_, Postgres>,
    message: &Envelope,
) -> Result<StageOutput, PipelineError> {
    let pages = pages::list_for_request(tx, message.request_id).await?;

    let groups = group_contiguous_runs(&pages);
    let document_count = i32::try_from(groups.len()).unwrap_or(i32::MAX);

    let mut outputs = StageOutput::with_capacity(groups.len());

    for (doc_type, page_indices, ocr_texts) in &groups {
        let document_id =
            documents::insert(tx, message.request_id, doc_type, page_indices).await?;
        pages::assign_document(tx, message.request_id, page_indices, document_id).await?;

        let mut outgoing = message.clone();
        outgoing.document_id = Some(document_id);
        outgoing.current_stage = Some(StageName::try_new(EXTRACTOR_STAGE).expect("valid"));
        outgoing.source_component = Some("classification_aggregator".to_string());
        outgoing.payload = serde_json::json!({
            "doc_type": doc_type,
            "page_indices": page_indices,
            "ocr_text_by_page_index": ocr_texts,
        });
        outputs.push((EXTRACT_ROUTING_KEY.to_string(), outgoing));
    }

    // Extraction aggregation row must exist before any extraction message
    // is published; it is created here, in the same transaction, ahead
    // of the post-commit publishes (spec §4.8, mirroring §4.7's
    // commit-before-publish guarantee for the splitter).
    requests::set_document_count(tx, message.request_id, document_count).await?;
    aggregation::create(tx, message.request_id, EXTRACTION_STAGE, document_count).await?;

    if groups.is_empty() {
        // Zero pages: no extraction message will ever arrive to drive the
        // extraction aggregator's counter to completion, so this handler
        // fires that finalization itself (spec §4.8's edge case).
        aggregation::complete_with_zero_expected(tx, message.request_id, EXTRACTION_STAGE).await?;

        let mut consolidate_message = message.clone();
        consolidate_message.document_id = None;
        consolidate_message.current_stage =
            Some(StageName::try_new(CONSOLIDATOR_STAGE).expect("valid"));
        consolidate_message.source_component = Some("classification_aggregator".to_string());
        consolidate_message.payload = serde_json::json!({});
        outputs.push((CONSOLIDATE_ROUTING_KEY.to_string(), consolidate_message));
    }

    Ok(outputs)
}

/// Scan pages in `page_index` order, starting a new group whenever the
/// current page's `doc_type` differs from the previous one's. Pages with
/// a null `doc_type` are bucketed as `"unknown"` (spec §4.8).
fn group_contiguous_runs(
    pages: &[pages::PageRow],
) -> Vec<(String, Vec<i32>, std::collections::BTreeMap<i32, String>)> {
    let mut groups: Vec<(String, Vec<i32>, std::collections::BTreeMap<i32, String>)> = Vec::new();

    for page in pages {
        let doc_type = page.doc_type.clone().unwrap_or_else(|| "unknown".to_string());
        let ocr_text = page.ocr_text.clone().unwrap_or_default();

        match groups.last_mut() {
            Some((current_type, indices, texts)) if *current_type == doc_type => {
                indices.push(page.page_index);
                texts.insert(page.page_index, ocr_text);
            }
            _ => {
                let mut texts = std::collections::BTreeMap::new();
                texts.insert(page.page_index, ocr_text);
                groups.push((doc_type, vec![page.page_index], texts));
            }
        }
    }

    groups
}
