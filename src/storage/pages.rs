//! Repository for the `pages` table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::domain_types::{DocumentId, PageId, RequestId};
use crate::error::StorageError;
use crate::storage::pool::DbPool;

/// A `pages` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageRow {
    /// Primary key.
    #[sqlx(try_from = "uuid::Uuid")]
    pub id: PageId,
    /// Owning request.
    #[sqlx(try_from = "uuid::Uuid")]
    pub request_id: RequestId,
    /// 0-based, unique within `request_id`.
    pub page_index: i32,
    /// Free-text status (`"extracted"`, `"classified"`, `"grouped"`, ...).
    pub status: String,
    /// Opaque storage path for the page image/bytes.
    pub file_storage_path: Option<String>,
    /// OCR'd text, set by the OCR stage.
    pub ocr_text: Option<String>,
    /// OCR confidence, set by the OCR stage.
    pub ocr_confidence: Option<f32>,
    /// Classified document type, set by the classifier.
    pub doc_type: Option<String>,
    /// Classification confidence, set by the classifier.
    pub classification_confidence: Option<f32>,
    /// Owning document, set once by classification grouping; never
    /// changes thereafter.
    #[sqlx(try_from = "Option<uuid::Uuid>")]
    pub document_id: Option<DocumentId>,
    /// Free-form metadata bag.
    pub metadata: Value,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Insert `page_count` sequential page rows (0-based) for `request_id`, in
/// the same transaction as the splitter's aggregation-state row insert
/// (spec §4.7).
pub async fn insert_pages(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    page_count: i32,
) -> Result<Vec<PageId>, StorageError> {
    let mut ids = Vec::with_capacity(page_count as usize);
    for index in 0..page_count {
        let id = PageId::generate();
        sqlx::query(
            r"
            INSERT INTO pages (id, request_id, page_index, status)
            VALUES ($1, $2, $3, 'extracted')
            ",
        )
        .bind(id.as_ref())
        .bind(request_id.as_ref())
        .bind(index)
        .execute(&mut **tx)
        .await?;
        ids.push(id);
    }
    Ok(ids)
}

/// All pages of a request, ordered by `page_index` — the ordering
/// classification grouping (C8) scans over.
pub async fn list_for_request(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
) -> Result<Vec<PageRow>, StorageError> {
    let rows = sqlx::query_as::<_, PageRow>(
        "SELECT * FROM pages WHERE request_id = $1 ORDER BY page_index ASC",
    )
    .bind(request_id.as_ref())
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

/// Record OCR output. Idempotent on redelivery: re-applying the same text
/// and confidence is a harmless no-op write (spec §4.5).
pub async fn record_ocr(
    tx: &mut Transaction<'_, Postgres>,
    id: PageId,
    ocr_text: &str,
    ocr_confidence: f32,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE pages
        SET ocr_text = $2, ocr_confidence = $3, status = 'ocr_complete', updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id.as_ref())
    .bind(ocr_text)
    .bind(ocr_confidence)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Record a classification decision, whether machine- or operator-sourced.
/// Idempotent on redelivery for the same reason as [`record_ocr`].
pub async fn record_classification(
    tx: &mut Transaction<'_, Postgres>,
    id: PageId,
    doc_type: &str,
    confidence: f32,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE pages
        SET doc_type = $2, classification_confidence = $3, status = 'classified', updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id.as_ref())
    .bind(doc_type)
    .bind(confidence)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Assign `document_id` to every page in `page_indices` for `request_id`,
/// and mark them `grouped`. `document_id` is set once and never changes
/// thereafter (spec §3 invariant).
pub async fn assign_document(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    page_indices: &[i32],
    document_id: DocumentId,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE pages
        SET document_id = $3, status = 'grouped', updated_at = now()
        WHERE request_id = $1 AND page_index = ANY($2) AND document_id IS NULL
        ",
    )
    .bind(request_id.as_ref())
    .bind(page_indices)
    .bind(document_id.as_ref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Look up a single page by id, used by the backoffice re-entry surface
/// to validate `reference_id` before writing an operator's submission.
pub async fn find(pool: &DbPool, id: PageId) -> Result<PageRow, StorageError> {
    sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE id = $1")
        .bind(id.as_ref())
        .fetch_optional(pool)
        .await?
        .ok_or(StorageError::NotFound {
            entity: "page",
            id: id.as_ref().to_string(),
        })
}

/// Same as [`find`], scoped to an open transaction.
pub async fn find_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: PageId,
) -> Result<PageRow, StorageError> {
    sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE id = $1")
        .bind(id.as_ref())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StorageError::NotFound {
            entity: "page",
            id: id.as_ref().to_string(),
        })
}
