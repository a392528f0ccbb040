//! WorkflowRun routes (§6): create, heartbeat, status update, triage sweep,
//! terminate instances, and the distributor's own heartbeat/liveness pair
//! (not in the §6 table verbatim, but required for §4.4's liveness check).

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use jobmon_core::constants::WorkflowRunStatus;
use jobmon_core::wire::{
    CreateWorkflowRunRequest, CreateWorkflowRunResponse, DistributorAliveResponse,
    DistributorHeartbeatRequest, LogHeartbeatRequest, MessageResponse, StatusResponse,
    UpdateStatusRequest,
};

use crate::error::StateError;
use crate::repository::workflow_run;
use crate::server::AppState;
use crate::triage::triage_sweep;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflow_run", post(create_workflow_run))
        .route("/workflow_run/:id/log_heartbeat", post(log_heartbeat))
        .route("/workflow_run/:id/update_status", put(update_status))
        .route(
            "/workflow_run/:id/set_status_for_triaging",
            post(set_status_for_triaging),
        )
        .route(
            "/workflow_run/:id/terminate_task_instances",
            put(terminate_task_instances),
        )
        .route(
            "/workflow_run/:id/distributor_heartbeat",
            post(distributor_heartbeat),
        )
        .route("/workflow_run/:id/distributor_alive", get(distributor_alive))
}

async fn create_workflow_run(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRunRequest>,
) -> Result<Json<CreateWorkflowRunResponse>, StateError> {
    let run = workflow_run::create(&state.pool, req.workflow_id, &req.user, &req.jobmon_version).await?;
    workflow_run::log_heartbeat(&state.pool, run.id, req.next_report_increment).await?;
    Ok(Json(CreateWorkflowRunResponse {
        workflow_run_id: run.id,
        status: run.status,
    }))
}

/// §4.5.4 step 1: the heartbeat also carries the swarm's proposed status
/// (usually unchanged); the server applies any resume/stop status the
/// reaper or an operator has since set and always returns the current one.
async fn log_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<LogHeartbeatRequest>,
) -> Result<Json<StatusResponse>, StateError> {
    let run = workflow_run::log_heartbeat(&state.pool, id, req.next_report_increment).await?;
    Ok(Json(StatusResponse { status: run.status }))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StatusResponse>, StateError> {
    let to: WorkflowRunStatus = req
        .status
        .parse()
        .map_err(StateError::InvalidUsage)?;
    let run = workflow_run::transition(&state.pool, id, to).await?;
    Ok(Json(StatusResponse { status: run.status }))
}

async fn set_status_for_triaging(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, StateError> {
    let guard_interval_s = state
        .config
        .get_float("heartbeat", "triage_guard_interval_s")
        .unwrap_or(90.0);
    let n = triage_sweep(&state.pool, id, guard_interval_s).await?;
    Ok(Json(MessageResponse {
        message: format!("{n} task instance(s) triaged"),
    }))
}

async fn terminate_task_instances(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, StateError> {
    workflow_run::terminate_task_instances(&state.pool, id).await?;
    Ok(Json(MessageResponse {
        message: "task instances marked for termination".to_string(),
    }))
}

async fn distributor_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DistributorHeartbeatRequest>,
) -> Result<Json<MessageResponse>, StateError> {
    sqlx::query(
        "INSERT INTO distributor_heartbeat (workflow_run_id, report_by_date)
         VALUES ($1, now() + ($2 || ' seconds')::interval)
         ON CONFLICT (workflow_run_id) DO UPDATE SET report_by_date = EXCLUDED.report_by_date",
    )
    .bind(id)
    .bind(req.next_report_increment.to_string())
    .execute(&state.pool)
    .await?;
    Ok(Json(MessageResponse {
        message: "ok".to_string(),
    }))
}

async fn distributor_alive(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DistributorAliveResponse>, StateError> {
    let alive: bool = sqlx::query_scalar(
        "SELECT report_by_date > now() FROM distributor_heartbeat WHERE workflow_run_id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .unwrap_or(false);
    Ok(Json(DistributorAliveResponse { alive }))
}
