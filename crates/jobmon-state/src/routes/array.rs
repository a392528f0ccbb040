//! Array routes (§6): create array, queue a scheduled batch.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use jobmon_core::wire::{
    CreateArrayRequest, CreateArrayResponse, QueueTaskBatchRequest, QueueTaskBatchResponse,
};

use crate::error::StateError;
use crate::repository::array;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/array", post(create_array))
        .route("/array/:id/queue_task_batch", post(queue_task_batch))
}

async fn create_array(
    State(state): State<AppState>,
    Json(req): Json<CreateArrayRequest>,
) -> Result<Json<CreateArrayResponse>, StateError> {
    let row = array::create(
        &state.pool,
        req.workflow_id,
        req.task_template_version_id,
        req.max_concurrently_running,
        &req.name,
    )
    .await?;
    Ok(Json(CreateArrayResponse { array_id: row.id }))
}

async fn queue_task_batch(
    State(state): State<AppState>,
    Path(array_id): Path<i64>,
    Json(req): Json<QueueTaskBatchRequest>,
) -> Result<Json<QueueTaskBatchResponse>, StateError> {
    let tasks_by_status = array::queue_task_batch(
        &state.pool,
        &state.transitions,
        array_id,
        &req.task_ids,
        req.task_resources_id,
        req.workflow_run_id,
    )
    .await?;
    Ok(Json(QueueTaskBatchResponse { tasks_by_status }))
}
