//! Workflow catalog (C2): declarative stage topology, SLA policy, and
//! extraction schemas, loaded from YAML and cached for a process's
//! lifetime.

pub mod catalog;
pub mod types;

pub use catalog::WorkflowCatalog;
pub use types::{
    AggregationDef, ExpectedCountSource, ExtractionSchemaDef, FieldDef, SlaDef, StageDef,
    WorkflowDef,
};
