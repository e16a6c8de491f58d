//! Repository for the `documents` table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::domain_types::{DocumentId, RequestId};
use crate::error::StorageError;

/// A `documents` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    /// Primary key.
    #[sqlx(try_from = "uuid::Uuid")]
    pub id: DocumentId,
    /// Owning request.
    #[sqlx(try_from = "uuid::Uuid")]
    pub request_id: RequestId,
    /// Classified document type shared by every constituent page.
    pub doc_type: String,
    /// Ascending, contiguous page indices belonging to this document.
    pub page_indices: Vec<i32>,
    /// Free-text status (`"created"`, `"extracted"`, `"completed"`, ...).
    pub status: String,
    /// Extracted structured data, set by the extractor or an operator.
    pub extracted_data: Option<Value>,
    /// Extraction confidence.
    pub extraction_confidence: Option<f32>,
    /// Free-form metadata bag.
    pub metadata: Value,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Insert a new document row for one contiguous, same-doc_type run of
/// pages (classification grouping, C8).
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    doc_type: &str,
    page_indices: &[i32],
) -> Result<DocumentId, StorageError> {
    let id = DocumentId::generate();
    sqlx::query(
        r"
        INSERT INTO documents (id, request_id, doc_type, page_indices, status)
        VALUES ($1, $2, $3, $4, 'created')
        ",
    )
    .bind(id.as_ref())
    .bind(request_id.as_ref())
    .bind(doc_type)
    .bind(page_indices)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Record extraction output, whether machine- or operator-sourced.
/// Idempotent on redelivery.
pub async fn record_extraction(
    tx: &mut Transaction<'_, Postgres>,
    id: DocumentId,
    extracted_data: Value,
    confidence: f32,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE documents
        SET extracted_data = $2, extraction_confidence = $3, status = 'extracted', updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id.as_ref())
    .bind(extracted_data)
    .bind(confidence)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Mark every document of `request_id` `completed`, called by the
/// consolidator (C9) in the same transaction as finishing the request.
pub async fn complete_all_for_request(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE documents SET status = 'completed', updated_at = now() WHERE request_id = $1",
    )
    .bind(request_id.as_ref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// All documents of a request, in creation order — what the consolidator
/// assembles `result_payload` from.
pub async fn list_for_request(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
) -> Result<Vec<DocumentRow>, StorageError> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT * FROM documents WHERE request_id = $1 ORDER BY created_at ASC",
    )
    .bind(request_id.as_ref())
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

/// Look up a single document, used by the backoffice re-entry surface.
pub async fn find_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: DocumentId,
) -> Result<DocumentRow, StorageError> {
    sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1")
        .bind(id.as_ref())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StorageError::NotFound {
            entity: "document",
            id: id.as_ref().to_string(),
        })
}
