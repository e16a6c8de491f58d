//! Ingress HTTP surface (C13, external interface only): the one way a
//! request enters the pipeline from outside, and the one way a caller
//! polls its outcome.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use lapin::Channel;
use serde::{Deserialize, Serialize};

use crate::broker::{self, topology::EXCHANGE_PIPELINE};
use crate::domain_types::{RequestId, WorkflowName};
use crate::envelope::Envelope;
use crate::storage::requests;
use crate::storage::DbPool;

/// Shared state for the ingress HTTP surface.
#[derive(Clone)]
pub struct IngressState {
    /// Postgres pool.
    pub pool: DbPool,
    /// Broker channel the `request.new` envelope is published on.
    pub channel: Arc<Channel>,
}

/// Build the router: `POST /process`, `GET /status/:id`.
#[must_use]
pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/process", post(submit_request))
        .route("/status/:id", get(request_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    /// Caller-supplied opaque identifier, echoed back in status responses.
    external_id: Option<String>,
    /// Which workflow definition should govern this request; defaults to
    /// `"default"`.
    #[serde(default = "default_workflow_name")]
    workflow_name: String,
    /// Submission channel, free text (e.g. `"api"`, `"email"`).
    #[serde(default = "default_channel")]
    channel: String,
    /// Original filename as submitted, if any.
    original_filename: Option<String>,
    /// Opaque storage path where the caller has already staged the file.
    file_storage_path: Option<String>,
}

fn default_workflow_name() -> String {
    "default".to_string()
}

fn default_channel() -> String {
    "api".to_string()
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    request_id: RequestId,
}

async fn submit_request(
    State(state): State<IngressState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let workflow_name = WorkflowName::try_new(request.workflow_name)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let request_id = requests::insert(
        &mut tx,
        request.external_id.as_deref(),
        &request.channel,
        &workflow_name,
        0,
        request.original_filename.as_deref(),
        request.file_storage_path.as_deref(),
    )
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let message = Envelope::new(request_id, workflow_name);

    broker::publish(&state.channel, EXCHANGE_PIPELINE, "request.new", &message, "ingress")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tx.commit().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(SubmitResponse { request_id }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    request_id: RequestId,
    status: String,
    error_message: Option<String>,
    page_count: Option<i32>,
    document_count: Option<i32>,
    result_payload: Option<serde_json::Value>,
}

async fn request_status(
    State(state): State<IngressState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let request_id = RequestId::new(id);
    let row = requests::find(&state.pool, request_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let status = serde_json::to_value(row.status.0)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();

    Ok(Json(StatusResponse {
        request_id: row.id,
        status,
        error_message: row.error_message,
        page_count: row.page_count,
        document_count: row.document_count,
        result_payload: row.result_payload,
    }))
}
