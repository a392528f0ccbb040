//! TaskInstance queries for the worker- and distributor-facing routes
//! (§4.3, §4.4, §6).

use jobmon_core::constants::TaskInstanceStatus;
use jobmon_core::wire::{ActiveTaskInstance, QueuedTaskInstance, UsageStats};
use sqlx::PgPool;

use crate::error::StateError;
use crate::models::TaskInstance;
use crate::transition::{TiTransitionOutcome, TransitionService};

pub async fn find(pool: &PgPool, task_instance_id: i64) -> Result<TaskInstance, StateError> {
    sqlx::query_as("SELECT * FROM task_instance WHERE id = $1")
        .bind(task_instance_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StateError::NotFound {
            entity: "task_instance",
            id: task_instance_id,
        })
}

/// Resolve an array task instance by (array_id, batch_num, step_id) — the
/// worker's first step when `JOB_ID`/`ARRAY_STEP_ID` are all it has (§4.3
/// step 1).
pub async fn find_by_array_step(
    pool: &PgPool,
    array_id: i64,
    array_batch_num: i32,
    array_step_id: i32,
) -> Result<TaskInstance, StateError> {
    sqlx::query_as(
        "SELECT * FROM task_instance WHERE array_id = $1 AND array_batch_num = $2 AND array_step_id = $3",
    )
    .bind(array_id)
    .bind(array_batch_num)
    .bind(array_step_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StateError::NotFound {
        entity: "task_instance",
        id: array_step_id as i64,
    })
}

/// §4.3 step 3: transition to RUNNING and push `report_by_date` forward. The
/// caller exits without running the command if this returns `applied: false`
/// (e.g. the instance was already KILL_SELF'd).
pub async fn log_running(
    transitions: &TransitionService,
    pool: &PgPool,
    task_instance_id: i64,
    next_report_increment_s: f64,
) -> Result<TiTransitionOutcome, StateError> {
    let outcome = transitions
        .transition_task_instance(task_instance_id, TaskInstanceStatus::Running, None)
        .await?;
    if outcome.applied {
        bump_report_by_date(pool, task_instance_id, next_report_increment_s).await?;
    }
    Ok(outcome)
}

/// §4.3 step 5: heartbeat without a status change. `report_by_date` must
/// strictly increase between heartbeats from the same owner (§3, §8).
pub async fn log_heartbeat(
    pool: &PgPool,
    task_instance_id: i64,
    next_report_increment_s: f64,
) -> Result<TaskInstanceStatus, StateError> {
    bump_report_by_date(pool, task_instance_id, next_report_increment_s).await?;
    Ok(find(pool, task_instance_id).await?.status())
}

async fn bump_report_by_date(
    pool: &PgPool,
    task_instance_id: i64,
    next_report_increment_s: f64,
) -> Result<(), StateError> {
    sqlx::query(
        "UPDATE task_instance SET report_by_date = now() + ($1 || ' seconds')::interval WHERE id = $2",
    )
    .bind(next_report_increment_s.to_string())
    .bind(task_instance_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn log_distributor_id(
    transitions: &TransitionService,
    pool: &PgPool,
    task_instance_id: i64,
    distributor_id: &str,
) -> Result<TiTransitionOutcome, StateError> {
    sqlx::query("UPDATE task_instance SET distributor_id = $1 WHERE id = $2")
        .bind(distributor_id)
        .bind(task_instance_id)
        .execute(pool)
        .await?;
    transitions
        .transition_task_instance(task_instance_id, TaskInstanceStatus::Launched, None)
        .await
}

pub async fn queueing_error(
    transitions: &TransitionService,
    task_instance_id: i64,
    message: &str,
) -> Result<TiTransitionOutcome, StateError> {
    transitions
        .transition_task_instance(task_instance_id, TaskInstanceStatus::NoDistributorId, Some(message))
        .await
}

/// §4.3 step 6: terminal transition with usage stats and (for error states)
/// the stderr tail / error message persisted to `task_instance_error_log`.
pub async fn transition_to_terminal(
    transitions: &TransitionService,
    pool: &PgPool,
    task_instance_id: i64,
    status: TaskInstanceStatus,
    error_message: Option<&str>,
    usage: &UsageStats,
) -> Result<TiTransitionOutcome, StateError> {
    sqlx::query(
        "UPDATE task_instance SET maxrss_bytes = $1, user_time_sec = $2, system_time_sec = $3 WHERE id = $4",
    )
    .bind(usage.maxrss_bytes)
    .bind(usage.user_time_sec)
    .bind(usage.system_time_sec)
    .bind(task_instance_id)
    .execute(pool)
    .await?;

    transitions
        .transition_task_instance(task_instance_id, status, error_message)
        .await
}

/// Distributor pump, step 1 (§4.4): task instances waiting for submission.
pub async fn queued_instances(
    pool: &PgPool,
    workflow_run_id: i64,
    limit: i64,
) -> Result<Vec<QueuedTaskInstance>, StateError> {
    let rows: Vec<(i64, i64, Option<i64>, Option<i32>, Option<i32>, Option<i64>, String, String, serde_json::Value)> = sqlx::query_as(
        "SELECT ti.id, ti.task_id, ti.array_id, ti.array_batch_num, ti.array_step_id,
                ti.task_resources_id, t.name, t.command, COALESCE(tr.requested_resources, '{}'::jsonb)
         FROM task_instance ti
         JOIN task t ON t.id = ti.task_id
         LEFT JOIN task_resources tr ON tr.id = ti.task_resources_id
         WHERE ti.workflow_run_id = $1 AND ti.status = 'QUEUED'
         ORDER BY ti.id ASC
         LIMIT $2",
    )
    .bind(workflow_run_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(task_instance_id, task_id, array_id, array_batch_num, array_step_id, task_resources_id, name, command, requested_resources)| {
                QueuedTaskInstance {
                    task_instance_id,
                    task_id,
                    array_id,
                    array_batch_num,
                    array_step_id,
                    task_resources_id: task_resources_id.unwrap_or_default(),
                    name,
                    command,
                    requested_resources,
                }
            },
        )
        .collect())
}

/// Distributor reconcile, step 3 (§4.4): LAUNCHED/RUNNING instances whose
/// liveness the plugin should be asked to confirm.
pub async fn active_instances(
    pool: &PgPool,
    workflow_run_id: i64,
) -> Result<Vec<ActiveTaskInstance>, StateError> {
    let rows: Vec<(i64, Option<String>, String)> = sqlx::query_as(
        "SELECT id, distributor_id, status FROM task_instance
         WHERE workflow_run_id = $1 AND status IN ('LAUNCHED', 'RUNNING') AND distributor_id IS NOT NULL",
    )
    .bind(workflow_run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, distributor_id, status)| {
            Some(ActiveTaskInstance {
                task_instance_id: id,
                distributor_id: distributor_id?,
                status: status.parse().ok()?,
            })
        })
        .collect())
}

/// KILL_SELF instances the distributor must ask the plugin to terminate
/// (§4.4 "Respond to KILL_SELF").
pub async fn kill_self_instances(
    pool: &PgPool,
    workflow_run_id: i64,
) -> Result<Vec<(i64, String)>, StateError> {
    let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
        "SELECT id, distributor_id FROM task_instance WHERE workflow_run_id = $1 AND status = 'KILL_SELF'",
    )
    .bind(workflow_run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, distributor_id)| Some((id, distributor_id?)))
        .collect())
}
