//! Repository backing the fan-in aggregator primitive (C6): an atomic
//! counter-per-(request, stage), implemented as a single
//! `UPDATE ... RETURNING` statement so the increment-and-read is one
//! round trip under the row's lock — a select-then-update pattern is
//! explicitly incorrect here (spec §9, "Atomic counter").

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain_types::RequestId;
use crate::error::StorageError;

/// An `aggregation_state` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AggregationRow {
    /// Primary key.
    pub id: Uuid,
    /// Owning request.
    #[sqlx(try_from = "uuid::Uuid")]
    pub request_id: RequestId,
    /// Stage name this counter belongs to (`"classification"` or
    /// `"extraction"`, matching the aggregator component names).
    pub stage: String,
    /// Total siblings expected before finalization fires.
    pub expected_count: i32,
    /// Siblings observed so far, clamped at `expected_count`.
    pub received_count: i32,
    /// Ids already counted, for optional duplicate-delivery rejection.
    pub received_ids: Vec<Uuid>,
    /// Set exactly when `received_count == expected_count`; finalization
    /// has fired at most once when this is true.
    pub is_complete: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of [`increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// No row exists for (request, stage): the producer has not created
    /// it yet. Per spec §4.6, log an error and absorb the message.
    RowMissing,
    /// This sibling's id was already present in `received_ids`: a
    /// redelivery after a prior commit. No-op, not double-counted.
    DuplicateIgnored,
    /// The round is not yet complete.
    StillWaiting,
    /// This increment completed the round. Finalization must fire exactly
    /// once; callers must only act on this variant (never on a second
    /// `Complete` for the same row, which this function prevents by
    /// flipping `is_complete` in the same statement).
    JustCompleted,
}

/// Create the aggregation-state row for `(request_id, stage)` with the
/// given `expected_count`. Must be called in the same transaction as the
/// sibling rows it will be counting (splitter, classification grouping),
/// before any fan-out message is published — the "commit before publish"
/// contract (C5) is what makes this row visible to the first sibling's
/// increment.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    stage: &str,
    expected_count: i32,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO aggregation_state (request_id, stage, expected_count)
        VALUES ($1, $2, $3)
        ",
    )
    .bind(request_id.as_ref())
    .bind(stage)
    .bind(expected_count)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Atomically increment the counter for `(request_id, stage)` and report
/// whether this increment just completed the round. `sibling_id` guards
/// against redelivery double-counting via `received_ids`.
///
/// Implemented as one `UPDATE ... RETURNING`, matching spec §4.6's
/// required statement shape exactly: the row is locked for the duration
/// of the single statement, so concurrent increments from sibling
/// messages serialize correctly under Postgres's row-level locking.
pub async fn increment(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    stage: &str,
    sibling_id: Uuid,
) -> Result<IncrementOutcome, StorageError> {
    let row: Option<(i32, i32, bool)> = sqlx::query_as(
        r"
        UPDATE aggregation_state
        SET received_count = LEAST(received_count + 1, expected_count),
            received_ids = array_append(received_ids, $3),
            is_complete = (LEAST(received_count + 1, expected_count) = expected_count),
            updated_at = now()
        WHERE request_id = $1 AND stage = $2
          AND NOT is_complete
          AND NOT ($3 = ANY(received_ids))
        RETURNING received_count, expected_count, is_complete
        ",
    )
    .bind(request_id.as_ref())
    .bind(stage)
    .bind(sibling_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some((received_count, expected_count, is_complete)) = row else {
        // Either the row is missing, already complete, or sibling_id was
        // already counted. Disambiguate with a read so the caller can log
        // precisely (spec §4.6's finalize-at-most-once guard).
        let existing: Option<(bool, Vec<Uuid>)> = sqlx::query_as(
            "SELECT is_complete, received_ids FROM aggregation_state WHERE request_id = $1 AND stage = $2",
        )
        .bind(request_id.as_ref())
        .bind(stage)
        .fetch_optional(&mut **tx)
        .await?;

        return Ok(match existing {
            None => IncrementOutcome::RowMissing,
            Some((_, ids)) if ids.contains(&sibling_id) => IncrementOutcome::DuplicateIgnored,
            Some(_) => IncrementOutcome::DuplicateIgnored,
        });
    };

    if is_complete && received_count == expected_count {
        Ok(IncrementOutcome::JustCompleted)
    } else {
        Ok(IncrementOutcome::StillWaiting)
    }
}

/// Mark `(request_id, stage)` complete without any increment ever having
/// occurred — the zero-expected-count edge case (spec §4.8: "aggregator
/// for extraction immediately terminal" when a request has zero pages).
/// A no-op if the row is already complete or `expected_count != 0`, so it
/// is safe to call on every redelivery of the message that created the
/// row.
pub async fn complete_with_zero_expected(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    stage: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r"
        UPDATE aggregation_state
        SET is_complete = true, updated_at = now()
        WHERE request_id = $1 AND stage = $2 AND expected_count = 0 AND NOT is_complete
        ",
    )
    .bind(request_id.as_ref())
    .bind(stage)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Look up the current counter state, for diagnostics and tests.
pub async fn find(
    tx: &mut Transaction<'_, Postgres>,
    request_id: RequestId,
    stage: &str,
) -> Result<Option<AggregationRow>, StorageError> {
    let row = sqlx::query_as::<_, AggregationRow>(
        "SELECT * FROM aggregation_state WHERE request_id = $1 AND stage = $2",
    )
    .bind(request_id.as_ref())
    .bind(stage)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}
