//! The message envelope (C1): the single serialized record that flows
//! across every queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain_types::{DocumentId, PageId, RequestId, StageName, TraceId, WorkflowName};

/// Sentinel routing key asking the resolver to advance to the workflow's
/// next stage after `current_stage`.
pub const NEXT: &str = "__next__";

/// Sentinel routing key asking the resolver to divert to the current
/// stage's configured backoffice queue.
pub const BACKOFFICE: &str = "__backoffice__";

/// Provenance marker carried inside `payload` (not a top-level envelope
/// field, matching the original system): the default automatic path.
pub const ORIGIN_PIPELINE: &str = "pipeline";

/// Provenance marker for messages republished by the operator surface.
pub const ORIGIN_BACKOFFICE: &str = "backoffice";

/// The envelope passed between every stage. Unknown fields on the wire are
/// preserved via `payload` being a free-form JSON object; every optional
/// field defaults so that a producer on an older schema version does not
/// break a newer consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Owning request. Required; deserialization fails without it.
    pub request_id: RequestId,

    /// Generated once at ingress, carried through every hop.
    pub trace_id: TraceId,

    /// Required; selects which workflow definition governs routing.
    pub workflow_name: WorkflowName,

    /// Name of the stage about to execute, or that just produced this
    /// message. Absent only for the very first message published by
    /// ingress, before the workflow router has run.
    #[serde(default)]
    pub current_stage: Option<StageName>,

    /// Absolute deadline, set once the router has resolved the workflow's
    /// SLA block.
    #[serde(default)]
    pub deadline_utc: Option<DateTime<Utc>>,

    /// 0-based page index, present on per-page messages.
    #[serde(default)]
    pub page_index: Option<i32>,

    /// Total page count for the owning request, present once the splitter
    /// has run.
    #[serde(default)]
    pub page_count: Option<i32>,

    /// Index into a multi-file submission; unused by the default workflow
    /// but preserved for forward compatibility.
    #[serde(default)]
    pub file_index: Option<i32>,

    /// Present on per-document messages.
    #[serde(default)]
    pub document_id: Option<DocumentId>,

    /// Total document count for the owning request, present once
    /// classification grouping has run.
    #[serde(default)]
    pub document_count: Option<i32>,

    /// Opaque, stage-scoped payload. Carries `origin` and `confidence`
    /// inside, the way the original system does, rather than as top-level
    /// envelope fields.
    #[serde(default = "default_payload")]
    pub payload: Value,

    /// Name of the component that last produced this message.
    #[serde(default)]
    pub source_component: Option<String>,

    /// Creation timestamp of this particular envelope instance (not the
    /// owning request).
    pub created_at: DateTime<Utc>,
}

fn default_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Build a fresh envelope for `request_id` under `workflow_name`, with
    /// a newly generated `trace_id` and `created_at = now`. Used by the
    /// HTTP ingress surface and tests.
    #[must_use]
    pub fn new(request_id: RequestId, workflow_name: WorkflowName) -> Self {
        Self {
            request_id,
            trace_id: TraceId::generate(),
            workflow_name,
            current_stage: None,
            deadline_utc: None,
            page_index: None,
            page_count: None,
            file_index: None,
            document_id: None,
            document_count: None,
            payload: default_payload(),
            source_component: None,
            created_at: Utc::now(),
        }
    }

    /// Produce a modified copy advancing `current_stage` and stamping
    /// `source_component`, the way every stage hand-off does. Never
    /// mutates `self`; callers must stop using the original after
    /// publishing (per the "no references retained after publish" design
    /// note).
    #[must_use]
    pub fn forwarded_as(&self, stage: StageName, producing_component: &str) -> Self {
        let mut next = self.clone();
        next.current_stage = Some(stage);
        next.source_component = Some(producing_component.to_string());
        next.created_at = Utc::now();
        next
    }

    /// Freshly generated AMQP message id for this publish, independent of
    /// `trace_id` which is stable across the whole request's lifetime.
    #[must_use]
    pub fn new_message_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// The `origin` field nested inside `payload`, defaulting to
    /// [`ORIGIN_PIPELINE`] when absent.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.payload
            .get("origin")
            .and_then(Value::as_str)
            .unwrap_or(ORIGIN_PIPELINE)
    }

    /// The `confidence` field nested inside `payload`, if present.
    #[must_use]
    pub fn payload_confidence(&self) -> Option<f64> {
        self.payload.get("confidence").and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json_preserving_unknown_fields() {
        let mut envelope = Envelope::new(RequestId::generate(), WorkflowName::try_new("default").unwrap());
        envelope.payload = serde_json::json!({"origin": "pipeline", "future_field": 42});

        let wire = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&wire).unwrap();

        assert_eq!(decoded.request_id, envelope.request_id);
        assert_eq!(decoded.payload["future_field"], 42);
    }

    #[test]
    fn missing_request_id_fails_to_deserialize() {
        let wire = serde_json::json!({
            "workflow_name": "default",
            "trace_id": Uuid::new_v4().to_string(),
            "created_at": Utc::now().to_rfc3339(),
        })
        .to_string();

        let result: Result<Envelope, _> = serde_json::from_str(&wire);
        assert!(result.is_err());
    }

    #[test]
    fn origin_defaults_to_pipeline() {
        let envelope = Envelope::new(RequestId::generate(), WorkflowName::try_new("default").unwrap());
        assert_eq!(envelope.origin(), ORIGIN_PIPELINE);
    }
}
