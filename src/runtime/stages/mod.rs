//! Stub stage-logic handlers. Per spec §1 these exercise the
//! orchestration substrate end-to-end; none of C1-C11 may depend on their
//! internals, and real OCR/classification/extraction is explicitly out
//! of scope.

pub mod classification_aggregator;
pub mod classifier;
pub mod consolidator;
pub mod extraction_aggregator;
pub mod extractor;
pub mod ocr;
pub mod splitter;
pub mod workflow_router;

use serde::de::Error as _;

use crate::domain_types::PageId;
use crate::envelope::Envelope;
use crate::error::PipelineError;

/// Literal routing key the classification aggregator's finalization (C8)
/// and the zero-page edge case both use to reach the extractor.
pub const EXTRACT_ROUTING_KEY: &str = "doc.extract";
/// Stage name stamped onto extraction messages as `current_stage`.
pub const EXTRACTOR_STAGE: &str = "extractor";
/// Literal routing key the extraction aggregator's finalization uses to
/// reach the consolidator.
pub const CONSOLIDATE_ROUTING_KEY: &str = "request.consolidate";
/// Stage name stamped onto consolidation messages as `current_stage`.
pub const CONSOLIDATOR_STAGE: &str = "consolidator";

/// Read `payload.page_id` off an envelope, failing deserialization-style
/// if it is absent or malformed — every per-page stage after the
/// splitter relies on it to address the page row it mutates.
pub fn page_id_from_payload(message: &Envelope) -> Result<PageId, PipelineError> {
    let raw = message
        .payload
        .get("page_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            PipelineError::Deserialize(serde::de::Error::custom(
                "envelope payload missing page_id",
            ))
        })?;
    let uuid: uuid::Uuid = raw.parse().map_err(|_| {
        PipelineError::Deserialize(serde::de::Error::custom("payload.page_id is not a UUID"))
    })?;
    Ok(PageId::new(uuid))
}
