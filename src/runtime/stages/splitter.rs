//! `splitter` stage (C7): stub fan-out. Real page decoding is out of
//! scope; page count is a random stub (3-5 pages).

use async_trait::async_trait;
use rand::Rng;
use sqlx::{Postgres, Transaction};

use crate::envelope::{Envelope, NEXT};
use crate::error::PipelineError;
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::{aggregation, pages, requests};

/// The fan-in stage name the classification aggregator counts against,
/// matching `aggregation_state.stage` values used across the codebase.
pub const CLASSIFICATION_STAGE: &str = "classification";

/// Fans a request out into `page_count` page rows and messages.
pub struct SplitterHandler;

#[async_trait]
impl StageHandler for SplitterHandler {
    fn component_name(&self) -> &'static str {
        "splitter"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let page_count = rand::thread_rng().gen_range(3..=5);

        requests::set_page_count(tx, message.request_id, page_count).await?;
        let page_ids = pages::insert_pages(tx, message.request_id, page_count).await?;

        // The classification-stage aggregation row must be visible to
        // every sibling's increment before the first fan-out message is
        // published: creating it here, inside this same transaction,
        // ahead of the publishes the runtime performs after commit, is
        // what guarantees that (spec §4.7).
        aggregation::create(
            tx,
            message.request_id,
            CLASSIFICATION_STAGE,
            page_count,
        )
        .await?;
        requests::advance_to_classifying(tx, message.request_id).await?;

        let mut outputs = StageOutput::with_capacity(page_ids.len());
        for (index, page_id) in page_ids.into_iter().enumerate() {
            let mut outgoing = message.clone();
            outgoing.page_index = Some(i32::try_from(index).unwrap_or(i32::MAX));
            outgoing.page_count = Some(page_count);
            outgoing.source_component = Some(self.component_name().to_string());
            outgoing.payload = serde_json::json!({ "page_id": page_id.as_ref() });
            outputs.push((NEXT.to_string(), outgoing));
        }

        Ok(outputs)
    }
}
