//! Error types, one `thiserror` enum per subsystem boundary, composed into
//! a single top-level [`DocflowError`] that worker binaries convert to
//! `anyhow::Error` at the edge.

use thiserror::Error;

use crate::domain_types::{RequestId, StageName, WorkflowName};

/// Errors raised while loading or querying the workflow catalog (C2).
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The named workflow has no definition file under `workflows/`.
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(WorkflowName),

    /// The workflow file exists but failed to parse.
    #[error("failed to parse workflow {name}: {source}")]
    Parse {
        /// Name of the offending workflow file (its stem).
        name: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// I/O failure reading the workflow directory or a workflow file.
    #[error("I/O error reading workflows: {0}")]
    Io(#[from] std::io::Error),

    /// A named stage does not exist in the requested workflow.
    #[error("workflow {workflow} has no stage named {stage}")]
    UnknownStage {
        /// Workflow name.
        workflow: WorkflowName,
        /// Stage name that was not found.
        stage: StageName,
    },

    /// No stage in the workflow is implemented by the requested component.
    #[error("workflow {workflow} has no stage for component {component}")]
    UnknownComponent {
        /// Workflow name.
        workflow: WorkflowName,
        /// Component name that was not found.
        component: String,
    },
}

/// Errors raised by the routing resolver (C4).
#[derive(Debug, Error)]
pub enum RoutingError {
    /// `NEXT` was requested but the message carries no resolvable current
    /// stage (neither `current_stage` nor a component fallback matched).
    #[error("cannot resolve NEXT: no current stage for component {component} in workflow {workflow}")]
    UnresolvableStage {
        /// Workflow the message belongs to.
        workflow: WorkflowName,
        /// Executing component name.
        component: String,
    },

    /// `BACKOFFICE` was requested by a stage with no `backoffice_queue`
    /// configured — a programmer error per spec.
    #[error("stage {stage} in workflow {workflow} has no backoffice_queue configured")]
    NoBackofficeQueue {
        /// Workflow the message belongs to.
        workflow: WorkflowName,
        /// Stage that emitted the sentinel.
        stage: StageName,
    },

    /// Underlying catalog lookup failed while resolving.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A `sqlx` query or pool operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row expected to exist was not found.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity (`"request"`, `"page"`, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// An invariant the schema does not enforce was violated in application
    /// code (e.g. attempting to set `page_count` twice).
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

/// Errors raised declaring or using the broker topology (C3).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The underlying AMQP client failed.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// A message could not be serialized for publish.
    #[error("failed to serialize outgoing message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised validating or loading process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent.
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    /// An environment variable was present but failed to parse or validate.
    #[error("invalid value for {var}: {reason}")]
    InvalidVar {
        /// Name of the environment variable.
        var: String,
        /// Human-readable reason it was rejected.
        reason: String,
    },
}

/// Errors raised by the request lifecycle guard (C11).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    /// The requested transition is not legal from the current status.
    #[error("request {request_id}: illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// Request the transition was attempted on.
        request_id: RequestId,
        /// Status the request was in.
        from: crate::lifecycle::RequestStatus,
        /// Status that was rejected.
        to: crate::lifecycle::RequestStatus,
    },
}

/// Errors raised by stage handlers (C5) and the fan-in primitive (C6).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The incoming envelope failed to deserialize. Per spec this is
    /// permanent: nack without requeue, straight to DLQ.
    #[error("failed to deserialize envelope: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Storage layer failure during stage processing.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Routing resolution failure while publishing stage output.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Catalog lookup failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Broker failure while publishing or declaring topology.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A lifecycle transition was rejected.
    #[error(transparent)]
    Lifecycle(#[from] StateTransitionError),
}

impl PipelineError {
    /// Whether this error is permanent (deserialization, unknown workflow)
    /// and should route straight to the DLQ, versus transient (DB/broker
    /// hiccup) and eligible for requeue.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::Deserialize(_)
                | PipelineError::Catalog(CatalogError::UnknownWorkflow(_))
        )
    }
}

/// Top-level error type composing every subsystem error, analogous to the
/// teacher's composed error enum.
#[derive(Debug, Error)]
pub enum DocflowError {
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Catalog failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Routing failure.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Broker failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Pipeline/stage-handler failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Lifecycle transition failure.
    #[error(transparent)]
    Lifecycle(#[from] StateTransitionError),
}
