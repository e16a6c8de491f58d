//! End-to-end scenarios exercising storage, fan-in, grouping, lifecycle,
//! and SLA monitoring together against a real Postgres database, the way
//! spec.md §8's testable-property scenarios are written: drive the
//! repositories and stage handlers directly rather than mocking them.

use chrono::{Duration as ChronoDuration, Utc};
use docflow::domain_types::{RequestId, WorkflowName};
use docflow::envelope::Envelope;
use docflow::runtime::stages::classification_aggregator::ClassificationAggregatorHandler;
use docflow::runtime::stages::extraction_aggregator::ExtractionAggregatorHandler;
use docflow::runtime::{StageHandler, StageOutput};
use docflow::sla_monitor;
use docflow::storage::aggregation::{self, IncrementOutcome};
use docflow::storage::{backoffice, documents, pages, requests};
use sqlx::PgPool;
use uuid::Uuid;

fn workflow() -> WorkflowName {
    WorkflowName::try_new("default").unwrap()
}

async fn seed_request(pool: &PgPool) -> RequestId {
    let mut tx = pool.begin().await.unwrap();
    let id = requests::insert(&mut tx, None, "api", &workflow(), 0, None, None)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    id
}

fn message_for(request_id: RequestId) -> Envelope {
    Envelope::new(request_id, workflow())
}

/// Scenario: every page of a request reports its classification; the
/// fan-in counter completes on exactly the last sibling, and a redelivery
/// of an already-counted sibling is absorbed rather than double-counted.
#[sqlx::test]
async fn classification_fan_in_completes_once_and_ignores_redelivery(pool: PgPool) {
    let request_id = seed_request(&pool).await;

    let mut tx = pool.begin().await.unwrap();
    requests::set_page_count(&mut tx, request_id, 3).await.unwrap();
    let page_ids = pages::insert_pages(&mut tx, request_id, 3).await.unwrap();
    aggregation::create(&mut tx, request_id, "classification", 3).await.unwrap();
    for page_id in &page_ids {
        pages::record_classification(&mut tx, *page_id, "invoice", 0.95).await.unwrap();
    }
    tx.commit().await.unwrap();

    let handler = ClassificationAggregatorHandler;
    let mut outputs: Vec<StageOutput> = Vec::new();

    for page_id in &page_ids {
        let mut message = message_for(request_id);
        message.payload = serde_json::json!({ "page_id": page_id.as_ref() });
        let mut tx = pool.begin().await.unwrap();
        let result = handler.handle(&mut tx, &message).await.unwrap();
        tx.commit().await.unwrap();
        outputs.push(result);
    }

    let non_empty: Vec<&StageOutput> = outputs.iter().filter(|o| !o.is_empty()).collect();
    assert_eq!(non_empty.len(), 1, "finalization must fire exactly once");

    let docs = {
        let mut tx = pool.begin().await.unwrap();
        let docs = documents::list_for_request(&mut tx, request_id).await.unwrap();
        tx.commit().await.unwrap();
        docs
    };
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].page_indices, vec![0, 1, 2]);

    // Redeliver the first page's message again: already counted, must be
    // absorbed without re-triggering finalization or a second document.
    let mut redelivered = message_for(request_id);
    redelivered.payload = serde_json::json!({ "page_id": page_ids[0].as_ref() });
    let mut tx = pool.begin().await.unwrap();
    let outcome = aggregation::increment(
        &mut tx,
        request_id,
        "classification",
        *page_ids[0].as_ref(),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(outcome, IncrementOutcome::DuplicateIgnored);
}

/// Scenario: classification grouping (C8) only merges *consecutive*
/// same-`doc_type` pages; a type repeated later, non-contiguously, starts
/// a fresh document rather than being folded into the earlier one.
#[sqlx::test]
async fn classification_grouping_splits_on_non_contiguous_repeats(pool: PgPool) {
    let request_id = seed_request(&pool).await;

    let mut tx = pool.begin().await.unwrap();
    requests::set_page_count(&mut tx, request_id, 4).await.unwrap();
    let page_ids = pages::insert_pages(&mut tx, request_id, 4).await.unwrap();
    aggregation::create(&mut tx, request_id, "classification", 4).await.unwrap();
    let types = ["invoice", "invoice", "receipt", "invoice"];
    for (page_id, doc_type) in page_ids.iter().zip(types) {
        pages::record_classification(&mut tx, *page_id, doc_type, 0.9).await.unwrap();
    }
    tx.commit().await.unwrap();

    let handler = ClassificationAggregatorHandler;
    for page_id in &page_ids {
        let mut message = message_for(request_id);
        message.payload = serde_json::json!({ "page_id": page_id.as_ref() });
        let mut tx = pool.begin().await.unwrap();
        handler.handle(&mut tx, &message).await.unwrap();
        tx.commit().await.unwrap();
    }

    let mut tx = pool.begin().await.unwrap();
    let mut docs = documents::list_for_request(&mut tx, request_id).await.unwrap();
    tx.commit().await.unwrap();
    docs.sort_by_key(|d| d.page_indices[0]);

    assert_eq!(docs.len(), 3, "invoice,invoice,receipt,invoice is three runs");
    assert_eq!(docs[0].doc_type, "invoice");
    assert_eq!(docs[0].page_indices, vec![0, 1]);
    assert_eq!(docs[1].doc_type, "receipt");
    assert_eq!(docs[1].page_indices, vec![2]);
    assert_eq!(docs[2].doc_type, "invoice");
    assert_eq!(docs[2].page_indices, vec![3]);
}

/// Scenario: the extraction aggregator's zero-expected-count edge case —
/// a request with no pages must still reach consolidation, since no
/// extraction message will ever arrive to drive its counter.
#[sqlx::test]
async fn zero_page_request_still_reaches_consolidation(pool: PgPool) {
    let request_id = seed_request(&pool).await;

    let mut tx = pool.begin().await.unwrap();
    requests::set_page_count(&mut tx, request_id, 0).await.unwrap();
    aggregation::create(&mut tx, request_id, "classification", 0).await.unwrap();
    tx.commit().await.unwrap();

    let handler = ClassificationAggregatorHandler;
    let mut message = message_for(request_id);
    message.payload = serde_json::json!({ "page_id": Uuid::new_v4() });

    let mut tx = pool.begin().await.unwrap();
    let outputs = handler.handle(&mut tx, &message).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, "request.consolidate");

    let mut tx = pool.begin().await.unwrap();
    let aggregation_row = aggregation::find(&mut tx, request_id, "extraction").await.unwrap();
    tx.commit().await.unwrap();
    assert!(aggregation_row.unwrap().is_complete);
}

/// Scenario: a low-confidence extraction diverted to back office, claimed
/// and submitted by an operator, drives the extraction fan-in counter the
/// same as a machine success would.
#[sqlx::test]
async fn backoffice_submission_completes_extraction_fan_in(pool: PgPool) {
    let request_id = seed_request(&pool).await;

    let mut tx = pool.begin().await.unwrap();
    requests::set_document_count(&mut tx, request_id, 1).await.unwrap();
    let document_id = documents::insert(&mut tx, request_id, "invoice", &[0]).await.unwrap();
    aggregation::create(&mut tx, request_id, "extraction", 1).await.unwrap();
    let task_id = backoffice::insert(
        &mut tx,
        request_id,
        backoffice::TaskType::Extraction,
        *document_id.as_ref(),
        5,
        serde_json::json!({ "doc_type": "invoice", "confidence": 0.4 }),
        None,
        &[],
        "extractor",
        "default",
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let claimed = backoffice::claim(&pool, task_id, "operator_jane").await.unwrap();
    assert!(claimed.is_some());

    let mut tx = pool.begin().await.unwrap();
    documents::record_extraction(
        &mut tx,
        document_id,
        serde_json::json!({ "invoice_number": "INV-9" }),
        1.0,
    )
    .await
    .unwrap();
    backoffice::submit(&mut tx, task_id, serde_json::json!({ "invoice_number": "INV-9" }))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let handler = ExtractionAggregatorHandler;
    let mut message = message_for(request_id);
    message.document_id = Some(document_id);
    message.payload = serde_json::json!({ "origin": "backoffice", "confidence": 1.0 });

    let mut tx = pool.begin().await.unwrap();
    let outputs = handler.handle(&mut tx, &message).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, "request.consolidate");
}

/// Scenario: the SLA monitor breaches exactly the requests whose deadline
/// has passed, leaves others untouched, and never reverts a breach.
#[sqlx::test]
async fn sla_monitor_breaches_only_past_deadline_requests(pool: PgPool) {
    let overdue = seed_request(&pool).await;
    let healthy = seed_request(&pool).await;

    let mut tx = pool.begin().await.unwrap();
    requests::set_deadline(&mut tx, overdue, Utc::now() - ChronoDuration::seconds(5), 60)
        .await
        .unwrap();
    requests::set_deadline(&mut tx, healthy, Utc::now() + ChronoDuration::seconds(3600), 3600)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    sla_monitor::run_once(&pool).await.unwrap();

    let overdue_row = requests::find(&pool, overdue).await.unwrap();
    let healthy_row = requests::find(&pool, healthy).await.unwrap();

    assert_eq!(
        serde_json::to_value(overdue_row.status.0).unwrap(),
        serde_json::json!("sla_breached")
    );
    assert_eq!(
        serde_json::to_value(healthy_row.status.0).unwrap(),
        serde_json::json!("routing")
    );

    // Running the pass again must not un-breach or re-log the same request.
    sla_monitor::run_once(&pool).await.unwrap();
    let overdue_row_again = requests::find(&pool, overdue).await.unwrap();
    assert_eq!(
        serde_json::to_value(overdue_row_again.status.0).unwrap(),
        serde_json::json!("sla_breached")
    );
}
