//! Backoffice re-entry HTTP surface (C4.11, external interface only).
//! Claims tasks, writes an operator's output into the referenced page or
//! document, and republishes onto the concrete routing key the automatic
//! path would have used, with `origin = "backoffice"`, `confidence = 1.0`
//! — all in the same transaction as marking the task complete.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use lapin::Channel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::{self, topology::EXCHANGE_PIPELINE};
use crate::domain_types::{BackofficeTaskId, DocumentId, PageId};
use crate::envelope::{Envelope, ORIGIN_BACKOFFICE};
use crate::storage::backoffice::{self, BackofficeTaskRow};
use crate::storage::{documents, pages, DbPool};

/// Shared state for the backoffice HTTP surface.
#[derive(Clone)]
pub struct BackofficeState {
    /// Postgres pool.
    pub pool: DbPool,
    /// Broker channel publishes re-entry messages on.
    pub channel: Arc<Channel>,
}

/// Build the router: `POST /tasks/:id/claim`, `POST /tasks/:id/submit`,
/// `GET /api/tasks`.
#[must_use]
pub fn router(state: BackofficeState) -> Router {
    Router::new()
        .route("/tasks/:id/claim", post(claim_task))
        .route("/tasks/:id/submit", post(submit_task))
        .route("/api/tasks", get(list_tasks))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    operator_username: String,
}

async fn claim_task(
    State(state): State<BackofficeState>,
    Path(id): Path<uuid::Uuid>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<BackofficeTaskRow>, StatusCode> {
    let task_id = BackofficeTaskId::new(id);
    backoffice::claim(&state.pool, task_id, &request.operator_username)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(Json)
        .ok_or(StatusCode::CONFLICT)
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    /// Operator-supplied correction. For a classification task this is
    /// expected to carry `{"doc_type": ...}`; for an extraction task,
    /// `{"extracted_data": ...}`.
    output_data: Value,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_id: BackofficeTaskId,
    status: &'static str,
}

async fn submit_task(
    State(state): State<BackofficeState>,
    Path(id): Path<uuid::Uuid>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let task_id = BackofficeTaskId::new(id);

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let task = backoffice::find_tx(&mut tx, task_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let (routing_key, payload) = match task.task_type.as_str() {
        "classification" => {
            let page = pages::find_tx(&mut tx, PageId::new(task.reference_id))
                .await
                .map_err(|_| StatusCode::NOT_FOUND)?;
            let doc_type = request
                .output_data
                .get("doc_type")
                .and_then(Value::as_str)
                .ok_or(StatusCode::BAD_REQUEST)?;
            pages::record_classification(&mut tx, page.id, doc_type, 1.0)
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            (
                "page.classified",
                serde_json::json!({
                    "page_id": page.id.as_ref(),
                    "origin": ORIGIN_BACKOFFICE,
                    "confidence": 1.0,
                }),
            )
        }
        "extraction" => {
            let document = documents::find_tx(&mut tx, DocumentId::new(task.reference_id))
                .await
                .map_err(|_| StatusCode::NOT_FOUND)?;
            let extracted_data = request
                .output_data
                .get("extracted_data")
                .cloned()
                .ok_or(StatusCode::BAD_REQUEST)?;
            documents::record_extraction(&mut tx, document.id, extracted_data, 1.0)
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            (
                "doc.extracted",
                serde_json::json!({
                    "document_id": document.id.as_ref(),
                    "origin": ORIGIN_BACKOFFICE,
                    "confidence": 1.0,
                }),
            )
        }
        other => {
            tracing::error!(task_type = other, "unknown backoffice task type");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    backoffice::submit(&mut tx, task_id, request.output_data.clone())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let workflow_name = task
        .workflow_name
        .clone()
        .and_then(|name| crate::domain_types::WorkflowName::try_new(name).ok())
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut message = Envelope::new(task.request_id, workflow_name);
    message.payload = payload;
    message.source_component = Some("backoffice".to_string());

    broker::publish(&state.channel, EXCHANGE_PIPELINE, routing_key, &message, "backoffice")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tx.commit().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(SubmitResponse { task_id, status: "completed" }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_tasks(
    State(state): State<BackofficeState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BackofficeTaskRow>>, StatusCode> {
    backoffice::list(&state.pool, query.status.as_deref())
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
