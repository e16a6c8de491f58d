//! Routing resolver (C4): translates sentinel routing keys into concrete
//! (exchange, routing-key, updated-message) destinations.

use crate::domain_types::{RoutingKey, StageName};
use crate::envelope::{Envelope, BACKOFFICE, NEXT};
use crate::error::RoutingError;
use crate::workflow::WorkflowCatalog;

/// The two pipeline exchanges a resolved destination can land on. The
/// dead-letter exchange is never a resolver output — it is only ever
/// reached via queue TTL or a worker's nack-without-requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// `doc.direct` — all intra-pipeline routing.
    Pipeline,
    /// `doc.backoffice` — human work diversion.
    Backoffice,
}

/// A concrete publish destination produced by [`resolve`].
#[derive(Debug, Clone)]
pub struct Destination {
    /// Exchange to publish on.
    pub exchange: Exchange,
    /// Concrete routing key (never a sentinel).
    pub routing_key: RoutingKey,
    /// The envelope to publish, with `current_stage` updated if the
    /// resolver advanced it.
    pub message: Envelope,
}

/// Outcome of resolving a stage's proposed routing key.
pub enum Resolution {
    /// A concrete destination to publish to.
    Publish(Destination),
    /// `NEXT` resolved past the workflow's last stage: nothing to publish.
    Terminal,
}

/// Resolve `proposed_key` (as returned by a stage handler) against
/// `message` and `catalog`, for the stage executed by `component`.
///
/// Never mutates `message` beyond `current_stage`, per spec §4.4.
pub fn resolve(
    catalog: &WorkflowCatalog,
    message: &Envelope,
    component: &str,
    proposed_key: &str,
) -> Result<Resolution, RoutingError> {
    match proposed_key {
        NEXT => resolve_next(catalog, message, component),
        BACKOFFICE => resolve_backoffice(catalog, message, component),
        literal => Ok(Resolution::Publish(Destination {
            exchange: Exchange::Pipeline,
            routing_key: RoutingKey::try_new(literal.to_string()).map_err(|_| {
                RoutingError::UnresolvableStage {
                    workflow: message.workflow_name.clone(),
                    component: component.to_string(),
                }
            })?,
            message: message.clone(),
        })),
    }
}

fn current_stage_name(
    catalog: &WorkflowCatalog,
    message: &Envelope,
    component: &str,
) -> Result<StageName, RoutingError> {
    if let Some(stage) = &message.current_stage {
        return Ok(stage.clone());
    }
    let stage = catalog.stage_by_component(&message.workflow_name, component)?;
    Ok(stage.name)
}

fn resolve_next(
    catalog: &WorkflowCatalog,
    message: &Envelope,
    component: &str,
) -> Result<Resolution, RoutingError> {
    let current = current_stage_name(catalog, message, component)?;
    let next = catalog.next_stage(&message.workflow_name, &current)?;
    let Some(next_stage) = next else {
        return Ok(Resolution::Terminal);
    };

    let mut updated = message.clone();
    updated.current_stage = Some(next_stage.name);

    Ok(Resolution::Publish(Destination {
        exchange: Exchange::Pipeline,
        routing_key: next_stage.routing_key,
        message: updated,
    }))
}

fn resolve_backoffice(
    catalog: &WorkflowCatalog,
    message: &Envelope,
    component: &str,
) -> Result<Resolution, RoutingError> {
    let current = current_stage_name(catalog, message, component)?;
    let stage = catalog.stage_by_name(&message.workflow_name, &current)?;
    let Some(queue_key) = stage.backoffice_queue else {
        return Err(RoutingError::NoBackofficeQueue {
            workflow: message.workflow_name.clone(),
            stage: current,
        });
    };

    Ok(Resolution::Publish(Destination {
        exchange: Exchange::Backoffice,
        routing_key: queue_key,
        message: message.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{RequestId, WorkflowName};
    use std::io::Write;

    fn catalog_with(body: &str) -> (tempfile::TempDir, WorkflowCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.yaml")).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let catalog = WorkflowCatalog::new(dir.path());
        (dir, catalog)
    }

    const WORKFLOW: &str = r"
name: default
sla:
  deadline_seconds: 60
stages:
  - name: splitter
    component: splitter
    routing_key: request.split
  - name: ocr
    component: ocr
    routing_key: page.ocr
  - name: classifier
    component: classifier
    routing_key: page.classify
    backoffice_queue: task.classification
";

    fn message() -> Envelope {
        Envelope::new(RequestId::generate(), WorkflowName::try_new("default").unwrap())
    }

    #[test]
    fn next_advances_to_the_following_stage() {
        let (_dir, catalog) = catalog_with(WORKFLOW);
        let mut message = message();
        message.current_stage = Some(StageName::try_new("splitter").unwrap());

        match resolve(&catalog, &message, "splitter", NEXT).unwrap() {
            Resolution::Publish(dest) => {
                assert_eq!(dest.routing_key.as_ref(), "page.ocr");
                assert_eq!(
                    dest.message.current_stage.unwrap().as_ref(),
                    "ocr"
                );
            }
            Resolution::Terminal => panic!("expected a publish"),
        }
    }

    #[test]
    fn next_past_last_stage_is_terminal() {
        let (_dir, catalog) = catalog_with(WORKFLOW);
        let mut message = message();
        message.current_stage = Some(StageName::try_new("classifier").unwrap());

        assert!(matches!(
            resolve(&catalog, &message, "classifier", NEXT).unwrap(),
            Resolution::Terminal
        ));
    }

    #[test]
    fn backoffice_requires_configured_queue() {
        let (_dir, catalog) = catalog_with(WORKFLOW);
        let mut message = message();
        message.current_stage = Some(StageName::try_new("splitter").unwrap());

        let result = resolve(&catalog, &message, "splitter", BACKOFFICE);
        assert!(matches!(result, Err(RoutingError::NoBackofficeQueue { .. })));
    }

    #[test]
    fn backoffice_resolves_when_configured() {
        let (_dir, catalog) = catalog_with(WORKFLOW);
        let mut message = message();
        message.current_stage = Some(StageName::try_new("classifier").unwrap());

        match resolve(&catalog, &message, "classifier", BACKOFFICE).unwrap() {
            Resolution::Publish(dest) => {
                assert_eq!(dest.exchange, Exchange::Backoffice);
                assert_eq!(dest.routing_key.as_ref(), "task.classification");
            }
            Resolution::Terminal => panic!("expected a publish"),
        }
    }

    #[test]
    fn literal_key_forwards_unchanged_on_pipeline_exchange() {
        let (_dir, catalog) = catalog_with(WORKFLOW);
        let message = message();

        match resolve(&catalog, &message, "classification_aggregator", "doc.extract").unwrap() {
            Resolution::Publish(dest) => {
                assert_eq!(dest.exchange, Exchange::Pipeline);
                assert_eq!(dest.routing_key.as_ref(), "doc.extract");
                assert_eq!(dest.message.current_stage, message.current_stage);
            }
            Resolution::Terminal => panic!("expected a publish"),
        }
    }
}
