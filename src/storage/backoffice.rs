//! Repository for the `backoffice_tasks` table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain_types::{BackofficeTaskId, RequestId};
use crate::error::StorageError;
use crate::storage::pool::DbPool;

/// Kind of work a backoffice task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// `reference_id` is a page id.
    Classification,
    /// `reference_id` is a document id.
    Extraction,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Extraction => "extraction",
        }
    }
}

/// A `backoffice_tasks` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackofficeTaskRow {
    /// Primary key.
    #[sqlx(try_from = "uuid::Uuid")]
    pub id: BackofficeTaskId,
    /// Owning request.
    #[sqlx(try_from = "uuid::Uuid")]
    pub request_id: RequestId,
    /// `"classification"` or `"extraction"`.
    pub task_type: String,
    /// Page id (classification) or document id (extraction).
    pub reference_id: Uuid,
    /// `"pending" -> "assigned" -> "completed"`.
    pub status: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Operator username once claimed.
    pub assigned_to: Option<String>,
    /// When the task was claimed.
    pub assigned_at: Option<DateTime<Utc>>,
    /// Snapshot of the machine's low-confidence output.
    pub input_data: Value,
    /// Operator-supplied correction, once submitted.
    pub output_data: Option<Value>,
    /// Deadline inherited from the owning request, if any.
    pub deadline_utc: Option<DateTime<Utc>>,
    /// Ordered skill tags required to claim this task.
    pub required_skills: Vec<String>,
    /// Stage that created this task (`"classifier"` or `"extractor"`).
    pub source_stage: Option<String>,
    /// Workflow governing the owning request.
    pub workflow_name: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time, set once on submit.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Create a pending task diverted from `source_stage`, carrying a
/// snapshot of the low-confidence machine output as `input_data`.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    task_type: TaskType,
    reference_id: Uuid,
    priority: i32,
    input_data: Value,
    deadline_utc: Option<DateTime<Utc>>,
    required_skills: &[String],
    source_stage: &str,
    workflow_name: &str,
) -> Result<BackofficeTaskId, StorageError> {
    let id = BackofficeTaskId::generate();
    sqlx::query(
        r"
        INSERT INTO backoffice_tasks
            (id, request_id, task_type, reference_id, status, priority,
             input_data, deadline_utc, required_skills, source_stage, workflow_name)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10)
        ",
    )
    .bind(id.as_ref())
    .bind(request_id.as_ref())
    .bind(task_type.as_str())
    .bind(reference_id)
    .bind(priority)
    .bind(input_data)
    .bind(deadline_utc)
    .bind(required_skills)
    .bind(source_stage)
    .bind(workflow_name)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Claim a pending task for `operator_username`. Returns the row iff the
/// claim succeeded (the task was still `pending`); no-op on an
/// already-claimed task.
pub async fn claim(
    pool: &DbPool,
    id: BackofficeTaskId,
    operator_username: &str,
) -> Result<Option<BackofficeTaskRow>, StorageError> {
    let row = sqlx::query_as::<_, BackofficeTaskRow>(
        r"
        UPDATE backoffice_tasks
        SET status = 'assigned', assigned_to = $2, assigned_at = now()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        ",
    )
    .bind(id.as_ref())
    .bind(operator_username)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Mark a task completed with the operator's submitted `output_data`.
/// Must be called in the same transaction as the re-entry publish (spec
/// §4.11: "marked complete in the same transaction as publishing").
pub async fn submit(
    tx: &mut Transaction<'_, Postgres>,
    id: BackofficeTaskId,
    output_data: Value,
) -> Result<BackofficeTaskRow, StorageError> {
    sqlx::query_as::<_, BackofficeTaskRow>(
        r"
        UPDATE backoffice_tasks
        SET status = 'completed', output_data = $2, completed_at = now()
        WHERE id = $1
        RETURNING *
        ",
    )
    .bind(id.as_ref())
    .bind(output_data)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StorageError::NotFound {
        entity: "backoffice_task",
        id: id.as_ref().to_string(),
    })
}

/// List tasks, optionally filtered by status, for the operator listing
/// endpoint (`GET /api/tasks`).
pub async fn list(
    pool: &DbPool,
    status: Option<&str>,
) -> Result<Vec<BackofficeTaskRow>, StorageError> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, BackofficeTaskRow>(
                "SELECT * FROM backoffice_tasks WHERE status = $1 ORDER BY priority ASC, created_at ASC",
            )
            .bind(status)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, BackofficeTaskRow>(
                "SELECT * FROM backoffice_tasks ORDER BY priority ASC, created_at ASC",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Look up a single task by id within an open transaction.
pub async fn find_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: BackofficeTaskId,
) -> Result<BackofficeTaskRow, StorageError> {
    sqlx::query_as::<_, BackofficeTaskRow>("SELECT * FROM backoffice_tasks WHERE id = $1")
        .bind(id.as_ref())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StorageError::NotFound {
            entity: "backoffice_task",
            id: id.as_ref().to_string(),
        })
}
