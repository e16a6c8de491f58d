//! Validated domain newtypes shared across the pipeline substrate.
//!
//! Bounded or non-empty values are wrapped with `nutype` so that an invalid
//! instance simply cannot be constructed; callers match on `Err` once, at
//! the boundary, rather than re-validating deep in business logic.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key of a `requests` row.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef
))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Primary key of a `pages` row.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef
))]
pub struct PageId(Uuid);

impl PageId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Primary key of a `documents` row.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef
))]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Primary key of a `backoffice_tasks` row.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef
))]
pub struct BackofficeTaskId(Uuid);

impl BackofficeTaskId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Primary key of an `operators` row.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef
))]
pub struct OperatorId(Uuid);

impl OperatorId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Per-message trace identifier, generated once at ingress and carried
/// through every envelope so logs from every stage can be joined.
#[nutype(derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef))]
pub struct TraceId(Uuid);

impl TraceId {
    /// Generate a fresh random trace id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Name of a workflow definition, e.g. `"default"`. Non-empty.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 100),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, Display)
)]
pub struct WorkflowName(String);

/// Name of a stage within a workflow, e.g. `"classifier"`. Non-empty.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 100),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, Display)
)]
pub struct StageName(String);

/// A concrete or sentinel broker routing key.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 200),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, Display)
)]
pub struct RoutingKey(String);

/// A classifier/extractor confidence score, clamped to `[0.0, 1.0]`.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, AsRef)
)]
pub struct Confidence(f64);

/// Number of unacknowledged deliveries a worker may hold at once.
#[nutype(
    validate(greater = 0, less_or_equal = 1000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef)
)]
pub struct PrefetchCount(u16);

/// Per-message broker TTL in milliseconds before a message is dead-lettered.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef)
)]
pub struct MessageTtlMs(u64);

/// Default SLA budget, in seconds, applied to a request when the workflow
/// does not specify its own deadline.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef)
)]
pub struct DefaultSlaSeconds(u32);

/// Maximum number of times a requeued delivery may be redelivered before a
/// worker nacks it straight to the dead-letter queue instead of requeuing
/// again.
#[nutype(
    validate(greater = 0, less_or_equal = 100),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef)
)]
pub struct MaxRedeliveries(u32);

impl Default for MaxRedeliveries {
    fn default() -> Self {
        Self::try_new(5).expect("5 is within bounds")
    }
}

/// Size of a `sqlx` Postgres connection pool.
#[nutype(
    validate(greater = 0, less_or_equal = 500),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef)
)]
pub struct ConnectionPoolSize(u32);

/// Validation failures for the newtypes in this module, surfaced by
/// `TryFrom`/`try_new` call sites that need a uniform error to log or
/// return to a caller.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field failed its bound/format check.
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },
}
