//! Workflow routes (§6): bind, resume, concurrency, status sync, paged
//! task fetch.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use jobmon_core::wire::{
    BindWorkflowRequest, BindWorkflowResponse, GetTasksRequest, GetTasksResponse,
    GetWorkflowEdgesResponse, IsResumableResponse, MaxConcurrentlyRunningResponse, MessageResponse,
    SetResumeRequest, TaskStatusUpdatesRequest, TaskStatusUpdatesResponse,
    UpdateMaxConcurrentlyRunningRequest,
};

use crate::error::StateError;
use crate::repository::{workflow, workflow_run};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflow", post(bind_workflow))
        .route("/workflow/:id/set_resume", post(set_resume))
        .route("/workflow/:id/is_resumable", get(is_resumable))
        .route("/workflow/:id/task_status_updates", post(task_status_updates))
        .route("/workflow/get_tasks/:id", get(get_tasks))
        .route("/workflow/:id/get_edges", get(get_edges))
        .route(
            "/workflow/:id/get_max_concurrently_running",
            get(get_max_concurrently_running),
        )
        .route(
            "/workflow/:id/update_max_concurrently_running",
            put(update_max_concurrently_running),
        )
        .route("/workflow/:id/force_cleanup", put(force_cleanup))
}

async fn bind_workflow(
    State(state): State<AppState>,
    Json(req): Json<BindWorkflowRequest>,
) -> Result<Json<BindWorkflowResponse>, StateError> {
    let result = workflow::bind(
        &state.pool,
        req.tool_version_id,
        &req.dag_hash,
        &req.workflow_args_hash,
        &req.task_hash,
        req.name.as_deref(),
        req.description.as_deref(),
        req.workflow_args.as_deref(),
        req.max_concurrently_running,
    )
    .await?;
    Ok(Json(BindWorkflowResponse {
        workflow_id: result.workflow.id,
        status: result.workflow.status,
        newly_created: result.newly_created,
    }))
}

async fn set_resume(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    Json(req): Json<SetResumeRequest>,
) -> Result<Json<MessageResponse>, StateError> {
    let run = latest_run_or_err(&state, workflow_id).await?;
    // Resume idempotence (§8): re-running set_resume with a run already in
    // a resume status is a no-op beyond the first call.
    if matches!(
        run.status(),
        jobmon_core::constants::WorkflowRunStatus::ColdResume
            | jobmon_core::constants::WorkflowRunStatus::HotResume
    ) {
        return Ok(Json(MessageResponse {
            message: "already resuming".to_string(),
        }));
    }
    workflow_run::set_resume(&state.pool, run.id, req.reset_running_jobs).await?;
    Ok(Json(MessageResponse {
        message: "resume requested".to_string(),
    }))
}

async fn is_resumable(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
) -> Result<Json<IsResumableResponse>, StateError> {
    let run = latest_run_or_err(&state, workflow_id).await?;
    let (pending, resumable) = workflow_run::is_resumable(&state.pool, run.id).await?;
    Ok(Json(IsResumableResponse {
        workflow_is_resumable: resumable,
        pending_kill_self: pending,
    }))
}

async fn force_cleanup(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
) -> Result<Json<MessageResponse>, StateError> {
    let run = latest_run_or_err(&state, workflow_id).await?;
    let n = workflow_run::force_cleanup(&state.pool, run.id).await?;
    Ok(Json(MessageResponse {
        message: format!("{n} stuck task instance(s) forced to ERROR_FATAL"),
    }))
}

async fn latest_run_or_err(
    state: &AppState,
    workflow_id: i64,
) -> Result<crate::models::WorkflowRun, StateError> {
    let row: Option<crate::models::WorkflowRun> = sqlx::query_as(
        "SELECT * FROM workflow_run WHERE workflow_id = $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(workflow_id)
    .fetch_optional(&state.pool)
    .await?;
    row.ok_or(StateError::EmptyWorkflow(workflow_id))
}

async fn task_status_updates(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    Json(req): Json<TaskStatusUpdatesRequest>,
) -> Result<Json<TaskStatusUpdatesResponse>, StateError> {
    let (time, tasks_by_status) =
        crate::repository::task::task_status_updates(&state.pool, workflow_id, req.last_sync).await?;
    Ok(Json(TaskStatusUpdatesResponse { time, tasks_by_status }))
}

async fn get_tasks(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    Query(req): Query<GetTasksRequest>,
) -> Result<Json<GetTasksResponse>, StateError> {
    let tasks =
        crate::repository::task::get_tasks_page(&state.pool, workflow_id, req.max_task_id, req.chunk_size).await?;
    Ok(Json(GetTasksResponse { tasks }))
}

async fn get_edges(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
) -> Result<Json<GetWorkflowEdgesResponse>, StateError> {
    let edges = crate::repository::task::get_edges(&state.pool, workflow_id).await?;
    Ok(Json(GetWorkflowEdgesResponse { edges }))
}

async fn get_max_concurrently_running(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
) -> Result<Json<MaxConcurrentlyRunningResponse>, StateError> {
    let wf = workflow::find(&state.pool, workflow_id).await?;
    Ok(Json(MaxConcurrentlyRunningResponse {
        max_concurrently_running: wf.max_concurrently_running,
    }))
}

async fn update_max_concurrently_running(
    State(state): State<AppState>,
    Path(workflow_id): Path<i64>,
    Json(req): Json<UpdateMaxConcurrentlyRunningRequest>,
) -> Result<Json<MessageResponse>, StateError> {
    workflow::update_max_concurrently_running(&state.pool, workflow_id, req.max_tasks).await?;
    Ok(Json(MessageResponse {
        message: "updated".to_string(),
    }))
}
