//! Repository for the `requests` table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::domain_types::{RequestId, WorkflowName};
use crate::error::StorageError;
use crate::lifecycle::RequestStatus;
use crate::storage::pool::DbPool;

/// A `requests` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RequestRow {
    /// Primary key.
    #[sqlx(try_from = "uuid::Uuid")]
    pub id: RequestId,
    /// Caller-supplied opaque identifier, if any.
    pub external_id: Option<String>,
    /// Submission channel (e.g. `"api"`, `"email"`).
    pub channel: String,
    /// Workflow governing this request's routing.
    #[sqlx(try_from = "String")]
    pub workflow_name: WorkflowName,
    /// Current lifecycle status, stored as its serde `snake_case` string.
    #[sqlx(try_from = "String")]
    pub status: StatusColumn,
    /// Scheduling priority; lower sorts first in operator task lists.
    pub priority: i32,
    /// Absolute deadline, set once the workflow router has run.
    pub deadline_utc: Option<DateTime<Utc>>,
    /// SLA budget in seconds.
    pub sla_seconds: Option<i32>,
    /// Original filename as submitted.
    pub original_filename: Option<String>,
    /// Opaque filesystem path where the uploaded file was stored.
    pub file_storage_path: Option<String>,
    /// Set exactly once by the splitter.
    pub page_count: Option<i32>,
    /// Set exactly once by the classification aggregator.
    pub document_count: Option<i32>,
    /// Final assembled result, set by the consolidator.
    pub result_payload: Option<Value>,
    /// Set when status becomes `failed` or `sla_breached`.
    pub error_message: Option<String>,
    /// Free-form metadata bag.
    pub metadata: Value,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Set iff `status = completed`.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Wrapper converting the `status` text column to/from [`RequestStatus`]
/// through `sqlx::FromRow`'s `try_from` attribute.
#[derive(Debug, Clone, Copy)]
pub struct StatusColumn(pub RequestStatus);

impl TryFrom<String> for StatusColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let status = match value.as_str() {
            "received" => RequestStatus::Received,
            "routing" => RequestStatus::Routing,
            "splitting" => RequestStatus::Splitting,
            "classifying" => RequestStatus::Classifying,
            "extracting" => RequestStatus::Extracting,
            "consolidating" => RequestStatus::Consolidating,
            "completed" => RequestStatus::Completed,
            "failed" => RequestStatus::Failed,
            "sla_breached" => RequestStatus::SlaBreached,
            other => return Err(format!("unknown request status: {other}")),
        };
        Ok(StatusColumn(status))
    }
}

fn status_str(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Received => "received",
        RequestStatus::Routing => "routing",
        RequestStatus::Splitting => "splitting",
        RequestStatus::Classifying => "classifying",
        RequestStatus::Extracting => "extracting",
        RequestStatus::Consolidating => "consolidating",
        RequestStatus::Completed => "completed",
        RequestStatus::Failed => "failed",
        RequestStatus::SlaBreached => "sla_breached",
    }
}

/// Insert a new request row in `received` status, returning its id.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    external_id: Option<&str>,
    channel: &str,
    workflow_name: &WorkflowName,
    priority: i32,
    original_filename: Option<&str>,
    file_storage_path: Option<&str>,
) -> Result<RequestId, StorageError> {
    let id = RequestId::generate();
    sqlx::query(
        r"
        INSERT INTO requests
            (id, external_id, channel, workflow_name, status, priority,
             original_filename, file_storage_path)
        VALUES ($1, $2, $3, $4, 'received', $5, $6, $7)
        ",
    )
    .bind(id.as_ref())
    .bind(external_id)
    .bind(channel)
    .bind(workflow_name.as_ref())
    .bind(priority)
    .bind(original_filename)
    .bind(file_storage_path)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Load a request by id.
pub async fn find(pool: &DbPool, id: RequestId) -> Result<RequestRow, StorageError> {
    sqlx::query_as::<_, RequestRow>("SELECT * FROM requests WHERE id = $1")
        .bind(id.as_ref())
        .fetch_optional(pool)
        .await?
        .ok_or(StorageError::NotFound {
            entity: "request",
            id: id.as_ref().to_string(),
        })
}

/// Load a request by id within an open transaction (used by stage
/// handlers that must see their own uncommitted writes).
pub async fn find_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
) -> Result<RequestRow, StorageError> {
    sqlx::query_as::<_, RequestRow>("SELECT * FROM requests WHERE id = $1")
        .bind(id.as_ref())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StorageError::NotFound {
            entity: "request",
            id: id.as_ref().to_string(),
        })
}

/// Set `deadline_utc` and `sla_seconds`, advancing status to `routing`.
/// Called once by the workflow router.
pub async fn set_deadline(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
    deadline_utc: DateTime<Utc>,
    sla_seconds: i32,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE requests
        SET deadline_utc = $2, sla_seconds = $3, status = 'routing', updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id.as_ref())
    .bind(deadline_utc)
    .bind(sla_seconds)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Set `page_count` exactly once and advance status to `splitting`.
/// Errors if `page_count` is already set (spec §3 invariant).
pub async fn set_page_count(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
    page_count: i32,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        r"
        UPDATE requests
        SET page_count = $2, status = 'splitting', updated_at = now()
        WHERE id = $1 AND page_count IS NULL
        ",
    )
    .bind(id.as_ref())
    .bind(page_count)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::InvariantViolated(format!(
            "page_count already set for request {id:?}"
        )));
    }
    Ok(())
}

/// Advance status from `splitting` to `classifying`, once the splitter has
/// finished writing page rows and the classification aggregation row.
/// A no-op if the request is not currently `splitting` (safe on
/// redelivery).
pub async fn advance_to_classifying(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE requests
        SET status = 'classifying', updated_at = now()
        WHERE id = $1 AND status = 'splitting'
        ",
    )
    .bind(id.as_ref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Set `document_count` exactly once and advance status to `extracting`.
pub async fn set_document_count(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
    document_count: i32,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        r"
        UPDATE requests
        SET document_count = $2, status = 'extracting', updated_at = now()
        WHERE id = $1 AND document_count IS NULL
        ",
    )
    .bind(id.as_ref())
    .bind(document_count)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::InvariantViolated(format!(
            "document_count already set for request {id:?}"
        )));
    }
    Ok(())
}

/// Transition `status`, validated by [`crate::lifecycle::transition_to`]
/// by the caller before this is invoked. This function only persists.
pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
    status: RequestStatus,
    error_message: Option<&str>,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE requests
        SET status = $2, error_message = COALESCE($3, error_message), updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id.as_ref())
    .bind(status_str(status))
    .bind(error_message)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Set `status = completed`, `completed_at = now`, and the final
/// `result_payload`, in one statement (consolidator, C9).
pub async fn complete(
    tx: &mut Transaction<'_, Postgres>,
    id: RequestId,
    result_payload: Value,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE requests
        SET status = 'completed', result_payload = $2, completed_at = now(), updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id.as_ref())
    .bind(result_payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Active requests (non-terminal status) whose deadline has passed —
/// candidates for the SLA monitor's breach pass.
pub async fn find_breached(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<RequestRow>, StorageError> {
    let rows = sqlx::query_as::<_, RequestRow>(
        r"
        SELECT * FROM requests
        WHERE status NOT IN ('completed', 'failed', 'sla_breached')
          AND deadline_utc IS NOT NULL
          AND deadline_utc <= $1
        ",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Active requests at risk of breaching within `warn_threshold_pct` of
/// their SLA budget — read-only, logged but not mutated.
pub async fn find_at_risk(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<RequestRow>, StorageError> {
    let rows = sqlx::query_as::<_, RequestRow>(
        r"
        SELECT * FROM requests
        WHERE status NOT IN ('completed', 'failed', 'sla_breached')
          AND deadline_utc IS NOT NULL
          AND deadline_utc > $1
        ",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Mark `id` as breached: `status = sla_breached`, `error_message` records
/// the breach timestamp. Always legal from a non-terminal status.
pub async fn mark_breached(
    pool: &DbPool,
    id: RequestId,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        UPDATE requests
        SET status = 'sla_breached',
            error_message = $2,
            updated_at = now()
        WHERE id = $1
          AND status NOT IN ('completed', 'failed', 'sla_breached')
        ",
    )
    .bind(id.as_ref())
    .bind(format!("SLA breached at {}", at.to_rfc3339()))
    .execute(pool)
    .await?;
    Ok(())
}
