//! Declarative shapes deserialized from `workflows/*.yaml`, mirroring the
//! Pydantic workflow schema of the system this was distilled from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain_types::{RoutingKey, StageName, WorkflowName};

/// A full workflow definition: name, SLA policy, ordered stages, and
/// optional per-doc-type extraction schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    /// Workflow name, matched against `Envelope::workflow_name`.
    pub name: WorkflowName,
    /// Free-text description, not interpreted by the runtime.
    #[serde(default)]
    pub description: String,
    /// Schema version of this file; not currently enforced, carried for
    /// forward compatibility.
    #[serde(default = "default_version")]
    pub version: u32,
    /// SLA policy applied to requests routed under this workflow.
    pub sla: SlaDef,
    /// Ordered list of stages; `stages[0]` is "the first stage" the
    /// workflow router resolves to.
    pub stages: Vec<StageDef>,
    /// Per-doc-type extraction field schemas, keyed by `doc_type`.
    #[serde(default)]
    pub extraction_schemas: HashMap<String, ExtractionSchemaDef>,
}

fn default_version() -> u32 {
    1
}

/// SLA policy: total deadline plus warn/escalation thresholds expressed as
/// percentages of the budget already consumed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlaDef {
    /// Total SLA budget in seconds from request creation.
    pub deadline_seconds: u32,
    /// Percentage of the budget consumed at which the monitor logs a
    /// warning (spec §4.10 uses 70%, i.e. remaining time below 30%).
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold_pct: u8,
    /// Percentage of the budget consumed at which the monitor would
    /// escalate further (reserved for operator tooling outside the core).
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold_pct: u8,
}

fn default_warn_threshold() -> u8 {
    70
}

fn default_escalation_threshold() -> u8 {
    90
}

/// Fan-in aggregation descriptor attached to an aggregator stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationDef {
    /// Always `"fan_in"` today; kept as a string for forward compatibility
    /// with future aggregation strategies.
    #[serde(rename = "type")]
    pub kind: String,
    /// Field the aggregation is keyed by; always `"request_id"` today.
    pub collect_by: String,
    /// Which request column supplies `expected_count`: `"page_count"` or
    /// `"document_count"`.
    pub expect_count_from: ExpectedCountSource,
}

/// Source of a fan-in stage's `expected_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedCountSource {
    /// Take the expected count from `requests.page_count`.
    PageCount,
    /// Take the expected count from `requests.document_count`.
    DocumentCount,
}

/// One stage within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    /// Stage name, unique within the workflow.
    pub name: StageName,
    /// Worker type that executes this stage; used for `current_stage`
    /// fallback resolution by component.
    pub component: String,
    /// Concrete routing key bound to this stage's queue.
    pub routing_key: RoutingKey,
    /// Soft execution budget; not enforced by the core, informative only.
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    /// Minimum machine confidence required to avoid backoffice diversion.
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    /// Concrete routing key to divert low-confidence work to.
    #[serde(default)]
    pub backoffice_queue: Option<RoutingKey>,
    /// Fan-in descriptor, present only on aggregator stages.
    #[serde(default)]
    pub aggregation: Option<AggregationDef>,
}

/// A single extracted field's expected shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name within `extracted_data`.
    pub name: String,
    /// Declared type (`"string"`, `"number"`, ...); informative only, not
    /// enforced by the stub extractor.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Whether the field is expected to always be present.
    #[serde(default)]
    pub required: bool,
}

/// Extraction schema for one `doc_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSchemaDef {
    /// Fields expected in `extracted_data` for this doc type.
    pub fields: Vec<FieldDef>,
}
