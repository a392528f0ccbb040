//! Task routes (§6): bind tasks (no args), bind task args, bind resources.

use axum::extract::State;
use axum::routing::{post, put};
use axum::{Json, Router};
use jobmon_core::wire::{
    BindResourcesRequest, BindResourcesResponse, BindTaskArgsRequest, BindTasksNoArgsRequest,
    BindTasksNoArgsResponse, BoundTask,
};

use crate::error::StateError;
use crate::repository::{task, task_resources};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/task/bind_tasks_no_args", put(bind_tasks_no_args))
        .route("/task/bind_task_args", put(bind_task_args))
        .route("/task/bind_resources", post(bind_resources))
}

async fn bind_tasks_no_args(
    State(state): State<AppState>,
    Json(req): Json<BindTasksNoArgsRequest>,
) -> Result<Json<BindTasksNoArgsResponse>, StateError> {
    let bound = task::bind_tasks_no_args(&state.pool, req.workflow_id, req.mark_created, &req.tasks).await?;
    let tasks = bound
        .into_iter()
        .map(|(key, b)| {
            (
                key,
                BoundTask {
                    task_id: b.task_id,
                    status: b.status.to_string(),
                },
            )
        })
        .collect();
    Ok(Json(BindTasksNoArgsResponse { tasks }))
}

async fn bind_task_args(
    State(state): State<AppState>,
    Json(req): Json<BindTaskArgsRequest>,
) -> Result<Json<()>, StateError> {
    let bindings: Vec<(i64, i64, String)> = req
        .task_args
        .into_iter()
        .map(|b| (b.task_id, b.arg_id, b.value))
        .collect();
    task::bind_task_args(&state.pool, &bindings).await?;
    Ok(Json(()))
}

async fn bind_resources(
    State(state): State<AppState>,
    Json(req): Json<BindResourcesRequest>,
) -> Result<Json<BindResourcesResponse>, StateError> {
    let task_resources_id = task_resources::bind(
        &state.pool,
        req.queue_id,
        req.task_resources_type_id,
        &req.requested_resources,
    )
    .await?;
    Ok(Json(BindResourcesResponse { task_resources_id }))
}
