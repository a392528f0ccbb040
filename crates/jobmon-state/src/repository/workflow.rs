//! Workflow bind/lookup queries (§6 `POST /workflow`). Content-addressed
//! hashing grounded on the `sha2` usage in the `golemcloud-golem` pack repo.

use jobmon_core::constants::WorkflowStatus;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::StateError;
use crate::models::Workflow;

pub fn compute_hash(tool_version_id: i64, dag_hash: &str, workflow_args_hash: &str, task_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_version_id.to_le_bytes());
    hasher.update(dag_hash.as_bytes());
    hasher.update(workflow_args_hash.as_bytes());
    hasher.update(task_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct BindResult {
    pub workflow: Workflow,
    pub newly_created: bool,
}

/// Resubmitting an identical workflow returns the same id with
/// `newly_created = false` (§8 hash-stability property).
pub async fn bind(
    pool: &PgPool,
    tool_version_id: i64,
    dag_hash: &str,
    workflow_args_hash: &str,
    task_hash: &str,
    name: Option<&str>,
    description: Option<&str>,
    workflow_args: Option<&str>,
    max_concurrently_running: i32,
) -> Result<BindResult, StateError> {
    let hash = compute_hash(tool_version_id, dag_hash, workflow_args_hash, task_hash);

    if let Some(existing) = find_by_hash(pool, &hash).await? {
        return Ok(BindResult {
            workflow: existing,
            newly_created: false,
        });
    }

    let row: Workflow = sqlx::query_as(
        "INSERT INTO workflow
            (tool_version_id, dag_hash, workflow_args_hash, task_hash, workflow_hash,
             name, description, workflow_args, status, max_concurrently_running, status_date)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
         ON CONFLICT (workflow_hash) DO UPDATE SET workflow_hash = EXCLUDED.workflow_hash
         RETURNING *",
    )
    .bind(tool_version_id)
    .bind(dag_hash)
    .bind(workflow_args_hash)
    .bind(task_hash)
    .bind(&hash)
    .bind(name)
    .bind(description)
    .bind(workflow_args)
    .bind(WorkflowStatus::Registering.to_string())
    .bind(max_concurrently_running)
    .fetch_one(pool)
    .await?;

    Ok(BindResult {
        workflow: row,
        newly_created: true,
    })
}

pub async fn find_by_hash(pool: &PgPool, hash: &str) -> Result<Option<Workflow>, StateError> {
    let row = sqlx::query_as("SELECT * FROM workflow WHERE workflow_hash = $1")
        .bind(hash)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find(pool: &PgPool, workflow_id: i64) -> Result<Workflow, StateError> {
    sqlx::query_as("SELECT * FROM workflow WHERE id = $1")
        .bind(workflow_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StateError::NotFound {
            entity: "workflow",
            id: workflow_id,
        })
}

pub async fn update_status(pool: &PgPool, workflow_id: i64, status: WorkflowStatus) -> Result<(), StateError> {
    sqlx::query("UPDATE workflow SET status = $1, status_date = now() WHERE id = $2")
        .bind(status.to_string())
        .bind(workflow_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set `created_date` once every task has finished binding (§3).
pub async fn mark_created(pool: &PgPool, workflow_id: i64) -> Result<(), StateError> {
    sqlx::query("UPDATE workflow SET created_date = now() WHERE id = $1 AND created_date IS NULL")
        .bind(workflow_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_max_concurrently_running(
    pool: &PgPool,
    workflow_id: i64,
    max_tasks: i32,
) -> Result<(), StateError> {
    sqlx::query("UPDATE workflow SET max_concurrently_running = $1 WHERE id = $2")
        .bind(max_tasks)
        .bind(workflow_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reaper correction (§4.2.5): a workflow marked FAILED whose tasks are all
/// DONE should be promoted back to DONE.
pub async fn is_inconsistent_failed_but_all_done(pool: &PgPool, workflow_id: i64) -> Result<bool, StateError> {
    let wf = find(pool, workflow_id).await?;
    if wf.status() != WorkflowStatus::Failed {
        return Ok(false);
    }
    let (total, done): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'DONE') FROM task WHERE workflow_id = $1",
    )
    .bind(workflow_id)
    .fetch_one(pool)
    .await?;
    Ok(total > 0 && total == done)
}
