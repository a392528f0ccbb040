//! TaskInstance routes (§6, §4.3, §4.4): worker lifecycle calls and the
//! distributor's pump/reconcile polling endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use jobmon_core::wire::{
    ActiveTaskInstancesResponse, KillSelfTaskInstance, KillSelfTaskInstancesResponse,
    LogDistributorIdRequest, LogHeartbeatTiRequest, LogHeartbeatTiResponse, LogRunningRequest,
    LogRunningResponse, MessageResponse, QueuedTaskInstancesResponse, TaskInstanceInfoResponse,
    TransitionToTerminalRequest,
};

use crate::error::StateError;
use crate::repository::task_instance as ti_repo;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/task_instance/:id", get(fetch))
        .route("/task_instance/:id/log_running", put(log_running))
        .route("/task_instance/:id/log_heartbeat", put(log_heartbeat))
        .route("/task_instance/:id/log_distributor_id", put(log_distributor_id))
        .route("/task_instance/:id/queueing_error", put(queueing_error))
        .route("/task_instance/:id/transition_to_terminal", put(transition_to_terminal))
        .route(
            "/workflow_run/:id/queued_task_instances",
            get(queued_task_instances),
        )
        .route(
            "/workflow_run/:id/active_task_instances",
            get(active_task_instances),
        )
        .route(
            "/array/:array_id/batch/:batch_num/step/:step_id",
            get(fetch_by_array_step),
        )
        .route(
            "/workflow_run/:id/kill_self_task_instances",
            get(kill_self_task_instances),
        )
}

async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TaskInstanceInfoResponse>, StateError> {
    let ti = ti_repo::find(&state.pool, id).await?;
    let task = crate::repository::task::find(&state.pool, ti.task_id).await?;
    let requested_resources = match ti.task_resources_id {
        Some(tr_id) => crate::repository::task_resources::find(&state.pool, tr_id)
            .await?
            .requested_resources,
        None => serde_json::Value::Null,
    };
    Ok(Json(TaskInstanceInfoResponse {
        task_instance_id: ti.id,
        task_id: ti.task_id,
        workflow_run_id: ti.workflow_run_id,
        workflow_id: task.workflow_id,
        name: task.name,
        command: task.command,
        requested_resources,
    }))
}

async fn fetch_by_array_step(
    State(state): State<AppState>,
    Path((array_id, batch_num, step_id)): Path<(i64, i32, i32)>,
) -> Result<Json<TaskInstanceInfoResponse>, StateError> {
    let ti = ti_repo::find_by_array_step(&state.pool, array_id, batch_num, step_id).await?;
    fetch(State(state), Path(ti.id)).await
}

async fn log_running(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<LogRunningRequest>,
) -> Result<Json<LogRunningResponse>, StateError> {
    let outcome = ti_repo::log_running(&state.transitions, &state.pool, id, req.next_report_increment).await?;
    Ok(Json(LogRunningResponse {
        accepted: outcome.applied,
        status: outcome.task_instance_status.to_string(),
    }))
}

async fn log_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<LogHeartbeatTiRequest>,
) -> Result<Json<LogHeartbeatTiResponse>, StateError> {
    let status = ti_repo::log_heartbeat(&state.pool, id, req.next_report_increment).await?;
    Ok(Json(LogHeartbeatTiResponse {
        status: status.to_string(),
    }))
}

async fn log_distributor_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<LogDistributorIdRequest>,
) -> Result<Json<MessageResponse>, StateError> {
    ti_repo::log_distributor_id(&state.transitions, &state.pool, id, &req.distributor_id).await?;
    Ok(Json(MessageResponse {
        message: "launched".to_string(),
    }))
}

async fn queueing_error(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MessageResponse>,
) -> Result<Json<MessageResponse>, StateError> {
    ti_repo::queueing_error(&state.transitions, id, &req.message).await?;
    Ok(Json(MessageResponse {
        message: "recorded".to_string(),
    }))
}

async fn transition_to_terminal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TransitionToTerminalRequest>,
) -> Result<Json<MessageResponse>, StateError> {
    let status = req.status.parse().map_err(StateError::InvalidUsage)?;
    ti_repo::transition_to_terminal(
        &state.transitions,
        &state.pool,
        id,
        status,
        req.error_message.as_deref(),
        &req.usage,
    )
    .await?;
    Ok(Json(MessageResponse {
        message: "terminal state recorded".to_string(),
    }))
}

async fn queued_task_instances(
    State(state): State<AppState>,
    Path(workflow_run_id): Path<i64>,
) -> Result<Json<QueuedTaskInstancesResponse>, StateError> {
    let instances =
        ti_repo::queued_instances(&state.pool, workflow_run_id, jobmon_core::constants::MAX_BATCH_SIZE as i64).await?;
    Ok(Json(QueuedTaskInstancesResponse { instances }))
}

async fn active_task_instances(
    State(state): State<AppState>,
    Path(workflow_run_id): Path<i64>,
) -> Result<Json<ActiveTaskInstancesResponse>, StateError> {
    let instances = ti_repo::active_instances(&state.pool, workflow_run_id).await?;
    Ok(Json(ActiveTaskInstancesResponse { instances }))
}

async fn kill_self_task_instances(
    State(state): State<AppState>,
    Path(workflow_run_id): Path<i64>,
) -> Result<Json<KillSelfTaskInstancesResponse>, StateError> {
    let instances = ti_repo::kill_self_instances(&state.pool, workflow_run_id)
        .await?
        .into_iter()
        .map(|(task_instance_id, distributor_id)| KillSelfTaskInstance {
            task_instance_id,
            distributor_id,
        })
        .collect();
    Ok(Json(KillSelfTaskInstancesResponse { instances }))
}
