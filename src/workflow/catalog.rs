//! The workflow catalog (C2): loads workflow definitions from disk and
//! caches them for the worker's lifetime. Hot reload is a non-goal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::domain_types::{StageName, WorkflowName};
use crate::error::CatalogError;
use crate::workflow::types::{ExtractionSchemaDef, StageDef, WorkflowDef};

/// Loads and caches [`WorkflowDef`]s read from YAML files under a
/// configured directory, one file per workflow named `<name>.yaml`.
///
/// Cached after first read using a `dashmap::DashMap`, matching the
/// concurrent-read-heavy-cache pattern used elsewhere in this crate family.
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    workflows_dir: PathBuf,
    cache: Arc<DashMap<String, Arc<WorkflowDef>>>,
}

impl WorkflowCatalog {
    /// Construct a catalog reading workflow files from `workflows_dir`.
    /// Nothing is read from disk until [`WorkflowCatalog::load`] is called.
    #[must_use]
    pub fn new(workflows_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
            cache: Arc::new(DashMap::new()),
        }
    }

    fn path_for(&self, name: &WorkflowName) -> PathBuf {
        self.workflows_dir.join(format!("{}.yaml", name.as_ref()))
    }

    /// Load a workflow definition by name, returning the cached copy on
    /// every call after the first.
    pub fn load(&self, name: &WorkflowName) -> Result<Arc<WorkflowDef>, CatalogError> {
        if let Some(cached) = self.cache.get(name.as_ref()) {
            return Ok(Arc::clone(&cached));
        }

        let path = self.path_for(name);
        let def = Self::load_from_path(&path, name.as_ref())?;
        let def = Arc::new(def);
        self.cache.insert(name.as_ref().to_string(), Arc::clone(&def));
        info!(workflow = %name, path = %path.display(), "loaded workflow definition");
        Ok(def)
    }

    fn load_from_path(path: &Path, name: &str) -> Result<WorkflowDef, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::UnknownWorkflow(
                WorkflowName::try_new(name.to_string())
                    .unwrap_or_else(|_| WorkflowName::try_new("unknown").unwrap()),
            ));
        }
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|source| CatalogError::Parse {
            name: name.to_string(),
            source,
        })
    }

    /// The first stage of a workflow, i.e. `stages[0]` — what the workflow
    /// router resolves a freshly ingested request to.
    pub fn first_stage(&self, name: &WorkflowName) -> Result<StageDef, CatalogError> {
        let def = self.load(name)?;
        def.stages
            .first()
            .cloned()
            .ok_or_else(|| CatalogError::UnknownComponent {
                workflow: name.clone(),
                component: "<first>".to_string(),
            })
    }

    /// The stage following `stage_name`, or `Ok(None)` if `stage_name` is
    /// terminal (the last stage of the workflow).
    pub fn next_stage(
        &self,
        name: &WorkflowName,
        stage_name: &StageName,
    ) -> Result<Option<StageDef>, CatalogError> {
        let def = self.load(name)?;
        let index = def
            .stages
            .iter()
            .position(|s| &s.name == stage_name)
            .ok_or_else(|| CatalogError::UnknownStage {
                workflow: name.clone(),
                stage: stage_name.clone(),
            })?;
        Ok(def.stages.get(index + 1).cloned())
    }

    /// Find a stage by its exact name.
    pub fn stage_by_name(
        &self,
        name: &WorkflowName,
        stage_name: &StageName,
    ) -> Result<StageDef, CatalogError> {
        let def = self.load(name)?;
        def.stages
            .iter()
            .find(|s| &s.name == stage_name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownStage {
                workflow: name.clone(),
                stage: stage_name.clone(),
            })
    }

    /// Find a stage by the component/worker type that executes it — the
    /// fallback used when a message lacks `current_stage`.
    pub fn stage_by_component(
        &self,
        name: &WorkflowName,
        component: &str,
    ) -> Result<StageDef, CatalogError> {
        let def = self.load(name)?;
        def.stages
            .iter()
            .find(|s| s.component == component)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownComponent {
                workflow: name.clone(),
                component: component.to_string(),
            })
    }

    /// Extraction schema for `(workflow, doc_type)`, if the workflow
    /// declares one.
    pub fn extraction_schema(
        &self,
        name: &WorkflowName,
        doc_type: &str,
    ) -> Result<Option<ExtractionSchemaDef>, CatalogError> {
        let def = self.load(name)?;
        Ok(def.extraction_schemas.get(doc_type).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_workflow(dir: &Path, name: &str, body: &str) {
        let mut file = std::fs::File::create(dir.join(format!("{name}.yaml"))).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    const SAMPLE: &str = r"
name: sample
sla:
  deadline_seconds: 60
stages:
  - name: first
    component: first_worker
    routing_key: a.b
  - name: second
    component: second_worker
    routing_key: c.d
";

    #[test]
    fn loads_and_caches_a_workflow() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "sample", SAMPLE);
        let catalog = WorkflowCatalog::new(dir.path());
        let name = WorkflowName::try_new("sample").unwrap();

        let first = catalog.load(&name).unwrap();
        let second = catalog.load(&name).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn first_and_next_stage_resolve_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "sample", SAMPLE);
        let catalog = WorkflowCatalog::new(dir.path());
        let name = WorkflowName::try_new("sample").unwrap();

        let first = catalog.first_stage(&name).unwrap();
        assert_eq!(first.name.as_ref(), "first");

        let next = catalog
            .next_stage(&name, &StageName::try_new("first").unwrap())
            .unwrap();
        assert_eq!(next.unwrap().name.as_ref(), "second");

        let terminal = catalog
            .next_stage(&name, &StageName::try_new("second").unwrap())
            .unwrap();
        assert!(terminal.is_none());
    }

    #[test]
    fn unknown_workflow_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = WorkflowCatalog::new(dir.path());
        let name = WorkflowName::try_new("missing").unwrap();
        let result = catalog.load(&name);
        assert!(matches!(result, Err(CatalogError::UnknownWorkflow(_))));
    }

    #[test]
    fn unknown_stage_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "sample", SAMPLE);
        let catalog = WorkflowCatalog::new(dir.path());
        let name = WorkflowName::try_new("sample").unwrap();
        let result = catalog.next_stage(&name, &StageName::try_new("nope").unwrap());
        assert!(matches!(result, Err(CatalogError::UnknownStage { .. })));
    }
}
