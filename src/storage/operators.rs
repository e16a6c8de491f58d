//! Repository for the `operators` table — an opaque registry, out of core
//! scope beyond a username and skill tags (spec §3).

use sqlx::{Postgres, Transaction};

use crate::domain_types::OperatorId;
use crate::error::StorageError;

/// An `operators` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OperatorRow {
    /// Primary key.
    #[sqlx(try_from = "uuid::Uuid")]
    pub id: OperatorId,
    /// Unique login/display username.
    pub username: String,
    /// Optional human-readable display name.
    pub display_name: Option<String>,
    /// Skill tags matched against `backoffice_tasks.required_skills`.
    pub skills: Vec<String>,
    /// Whether the operator can currently claim tasks.
    pub is_active: bool,
    /// The task currently assigned, if any.
    pub current_task_id: Option<uuid::Uuid>,
}

/// Look up an operator by username, used to validate a claim request.
pub async fn find_by_username(
    tx: &mut Transaction<'_, Postgres>,
    username: &str,
) -> Result<Option<OperatorRow>, StorageError> {
    let row = sqlx::query_as::<_, OperatorRow>("SELECT * FROM operators WHERE username = $1")
        .bind(username)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}
