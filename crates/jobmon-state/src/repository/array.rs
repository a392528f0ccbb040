//! Array creation and batch queueing (§6 `POST /array`, `POST
//! /array/{id}/queue_task_batch`).

use std::collections::HashMap;

use sqlx::PgPool;

use crate::error::StateError;
use crate::models::Array;
use crate::transition::TransitionService;

pub async fn create(
    pool: &PgPool,
    workflow_id: i64,
    task_template_version_id: i64,
    max_concurrently_running: i32,
    name: &str,
) -> Result<Array, StateError> {
    let row: Array = sqlx::query_as(
        "INSERT INTO array (workflow_id, task_template_version_id, max_concurrently_running, name)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(workflow_id)
    .bind(task_template_version_id)
    .bind(max_concurrently_running)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn find(pool: &PgPool, array_id: i64) -> Result<Array, StateError> {
    sqlx::query_as("SELECT * FROM array WHERE id = $1")
        .bind(array_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StateError::NotFound {
            entity: "array",
            id: array_id,
        })
}

/// Queue a batch of tasks already selected by the scheduler (§4.5.3): bind
/// `task_resources_id` on each, bump `num_attempts` (each task instance
/// created here is a new attempt, feeding the fatal/recoverable gate in
/// `fsm::task::transition_after_task_instance_error`), create one task
/// instance per task, and transition the tasks REGISTERING/ADJUSTING_RESOURCES
/// → QUEUED. Returns the per-task resulting status so the caller can feed it
/// back through `apply_update`.
pub async fn queue_task_batch(
    pool: &PgPool,
    transitions: &TransitionService,
    array_id: i64,
    task_ids: &[i64],
    task_resources_id: i64,
    workflow_run_id: i64,
) -> Result<HashMap<String, Vec<i64>>, StateError> {
    sqlx::query(
        "UPDATE task SET task_resources_id = $1 WHERE id = ANY($2)",
    )
    .bind(task_resources_id)
    .bind(task_ids)
    .execute(pool)
    .await?;

    let outcome = transitions
        .transition_task_batch(
            task_ids,
            &[
                jobmon_core::constants::TaskStatus::Registering,
                jobmon_core::constants::TaskStatus::AdjustingResources,
            ],
            jobmon_core::constants::TaskStatus::Queued,
        )
        .await?;

    if !outcome.transitioned.is_empty() {
        sqlx::query("UPDATE task SET num_attempts = num_attempts + 1 WHERE id = ANY($1)")
            .bind(&outcome.transitioned)
            .execute(pool)
            .await?;

        let batch_num: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(array_batch_num), -1) + 1 FROM task_instance WHERE array_id = $1",
        )
        .bind(array_id)
        .fetch_one(pool)
        .await?;

        for (step, task_id) in outcome.transitioned.iter().enumerate() {
            sqlx::query(
                "INSERT INTO task_instance
                    (task_id, workflow_run_id, array_id, array_batch_num, array_step_id,
                     task_resources_id, status, status_date)
                 VALUES ($1, $2, $3, $4, $5, $6, 'QUEUED', now())",
            )
            .bind(task_id)
            .bind(workflow_run_id)
            .bind(array_id)
            .bind(batch_num)
            .bind(step as i32)
            .bind(task_resources_id)
            .execute(pool)
            .await?;
        }
    }

    let mut tasks_by_status = HashMap::new();
    tasks_by_status.insert("QUEUED".to_string(), outcome.transitioned);
    if !outcome.invalid.is_empty() {
        tasks_by_status.insert("SKIPPED_INVALID_SOURCE".to_string(), outcome.invalid);
    }
    if !outcome.locked.is_empty() {
        tasks_by_status.insert("SKIPPED_LOCKED".to_string(), outcome.locked);
    }
    Ok(tasks_by_status)
}

/// Active-instance count for this array's concurrency cap (§3, §4.5.3).
pub async fn active_instance_count(pool: &PgPool, array_id: i64) -> Result<i64, StateError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM task_instance
         WHERE array_id = $1 AND status IN ('QUEUED', 'INSTANTIATED', 'LAUNCHED', 'RUNNING')",
    )
    .bind(array_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
