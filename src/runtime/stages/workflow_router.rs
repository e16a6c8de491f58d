//! `workflow_router` stage: resolves a freshly ingested request to its
//! workflow's first stage and stamps the SLA deadline.
//!
//! The router dispatches to whatever a workflow names as `stages[0]` — it
//! is not itself a routed pipeline stage and must not appear in a
//! workflow's `stages` list, or it would end up dispatching to itself.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{Postgres, Transaction};

use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::runtime::{StageHandler, StageOutput};
use crate::storage::requests;
use crate::workflow::WorkflowCatalog;

/// Resolves `request.new` envelopes to the workflow's first stage.
pub struct WorkflowRouterHandler {
    catalog: WorkflowCatalog,
}

impl WorkflowRouterHandler {
    /// Build a handler backed by `catalog`.
    #[must_use]
    pub fn new(catalog: WorkflowCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StageHandler for WorkflowRouterHandler {
    fn component_name(&self) -> &'static str {
        "workflow_router"
    }

    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Envelope,
    ) -> Result<StageOutput, PipelineError> {
        let def = self.catalog.load(&message.workflow_name)?;
        let first_stage = self.catalog.first_stage(&message.workflow_name)?;

        let deadline = Utc::now() + ChronoDuration::seconds(i64::from(def.sla.deadline_seconds));
        requests::set_deadline(
            tx,
            message.request_id,
            deadline,
            i32::try_from(def.sla.deadline_seconds).unwrap_or(i32::MAX),
        )
        .await?;

        let mut outgoing = message.clone();
        outgoing.current_stage = Some(first_stage.name.clone());
        outgoing.deadline_utc = Some(deadline);
        outgoing.source_component = Some(self.component_name().to_string());

        Ok(vec![(first_stage.routing_key.as_ref().to_string(), outgoing)])
    }
}
