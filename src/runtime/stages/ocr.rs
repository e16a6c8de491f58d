//! `ocr` stage: stub OCR. Real OCR/decoding is out of scope; writes a
//! fixed plausible text and confidence to the page row.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::envelope::{Envelope, NEXT};
use crate::error::PipelineError;
use crate::runtime::stages::page_id_from_payload;
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::pages;

/// Writes stub OCR output to the page referenced by `payload.page_id`.
pub struct OcrHandler;

#[async_trait]
impl StageHandler for OcrHandler {
    fn component_name(&self) -> &'static str {
        "ocr"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let page_id = page_id_from_payload(message)?;

        pages::record_ocr(tx, page_id, "Lorem ipsum dolor sit amet.", 0.97).await?;

        let mut outgoing = message.clone();
        outgoing.source_component = Some(self.component_name().to_string());
        Ok(vec![(NEXT.to_string(), outgoing)])
    }
}
