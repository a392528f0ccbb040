//! WorkflowRun bind/heartbeat/lock-and-link queries (§4.2, §6).

use jobmon_core::constants::WorkflowRunStatus;
use sqlx::PgPool;

use crate::error::StateError;
use crate::fsm::workflow_run as wr_fsm;
use crate::models::WorkflowRun;
use crate::repository::workflow;

pub async fn find(pool: &PgPool, workflow_run_id: i64) -> Result<WorkflowRun, StateError> {
    sqlx::query_as("SELECT * FROM workflow_run WHERE id = $1")
        .bind(workflow_run_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StateError::NotFound {
            entity: "workflow_run",
            id: workflow_run_id,
        })
}

/// Lock-and-link protocol (§3, §4.2): at most one workflow run per workflow
/// may be BOUND or RUNNING at a time. Binding a new run while another is
/// active fails with `InvalidUsage`; callers must resume the existing run
/// instead.
pub async fn create(
    pool: &PgPool,
    workflow_id: i64,
    user: &str,
    jobmon_version: &str,
) -> Result<WorkflowRun, StateError> {
    let mut txn = pool.begin().await?;

    let active: Option<(String,)> = sqlx::query_as(
        "SELECT status FROM workflow_run WHERE workflow_id = $1 AND status IN ('BOUND', 'RUNNING') FOR UPDATE",
    )
    .bind(workflow_id)
    .fetch_optional(&mut *txn)
    .await?;
    if active.is_some() {
        txn.rollback().await?;
        return Err(StateError::InvalidUsage(format!(
            "workflow {workflow_id} already has an active workflow run"
        )));
    }

    let row: WorkflowRun = sqlx::query_as(
        "INSERT INTO workflow_run (workflow_id, \"user\", jobmon_version, status, heartbeat_date, status_date, created_date)
         VALUES ($1, $2, $3, $4, now(), now(), now())
         RETURNING *",
    )
    .bind(workflow_id)
    .bind(user)
    .bind(jobmon_version)
    .bind(WorkflowRunStatus::Registered.to_string())
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok(row)
}

/// Transition the workflow run and cascade to the workflow (§4.2.2). Rejects
/// edges outside [`wr_fsm::VALID`].
pub async fn transition(
    pool: &PgPool,
    workflow_run_id: i64,
    to: WorkflowRunStatus,
) -> Result<WorkflowRun, StateError> {
    let mut txn = pool.begin().await?;
    let run: WorkflowRun = sqlx::query_as("SELECT * FROM workflow_run WHERE id = $1 FOR UPDATE")
        .bind(workflow_run_id)
        .fetch_optional(&mut *txn)
        .await?
        .ok_or(StateError::NotFound {
            entity: "workflow_run",
            id: workflow_run_id,
        })?;

    let from = run.status();
    if !wr_fsm::is_valid(from, to) {
        txn.rollback().await?;
        return Err(StateError::InvalidStateTransition {
            entity: "workflow_run",
            id: workflow_run_id,
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    sqlx::query("UPDATE workflow_run SET status = $1, status_date = now() WHERE id = $2")
        .bind(to.to_string())
        .bind(workflow_run_id)
        .execute(&mut *txn)
        .await?;

    txn.commit().await?;

    if let Some(wf_status) = wr_fsm::cascade_to_workflow(to) {
        workflow::update_status(pool, run.workflow_id, wf_status).await?;
    }

    find(pool, workflow_run_id).await
}

pub async fn log_heartbeat(
    pool: &PgPool,
    workflow_run_id: i64,
    next_report_increment_s: f64,
) -> Result<WorkflowRun, StateError> {
    sqlx::query(
        "UPDATE workflow_run SET heartbeat_date = now() + ($1 || ' seconds')::interval WHERE id = $2",
    )
    .bind(next_report_increment_s.to_string())
    .bind(workflow_run_id)
    .execute(pool)
    .await?;
    find(pool, workflow_run_id).await
}

/// Resume protocol (§4.2.4): flip this workflow run's active task instances
/// to KILL_SELF. Cold resume includes RUNNING; hot resume only LAUNCHED and
/// below.
pub async fn set_resume(
    pool: &PgPool,
    workflow_run_id: i64,
    reset_running_jobs: bool,
) -> Result<(), StateError> {
    let statuses: &[&str] = if reset_running_jobs {
        &["QUEUED", "INSTANTIATED", "LAUNCHED", "RUNNING"]
    } else {
        &["QUEUED", "INSTANTIATED", "LAUNCHED"]
    };
    sqlx::query(
        "UPDATE task_instance SET status = 'KILL_SELF', status_date = now()
         WHERE workflow_run_id = $1 AND status = ANY($2)",
    )
    .bind(workflow_run_id)
    .bind(statuses)
    .execute(pool)
    .await?;

    let target = if reset_running_jobs {
        WorkflowRunStatus::ColdResume
    } else {
        WorkflowRunStatus::HotResume
    };
    transition(pool, workflow_run_id, target).await?;
    Ok(())
}

/// "No KILL_SELF task instances still pending worker cleanup" (§4.2.4).
pub async fn is_resumable(pool: &PgPool, workflow_run_id: i64) -> Result<(i64, bool), StateError> {
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM task_instance WHERE workflow_run_id = $1 AND status = 'KILL_SELF'",
    )
    .bind(workflow_run_id)
    .fetch_one(pool)
    .await?;
    Ok((pending, pending == 0))
}

/// Escape hatch: forcibly flip stuck KILL_SELF instances to ERROR_FATAL for
/// jobs that will never self-report (§4.2.4).
pub async fn force_cleanup(pool: &PgPool, workflow_run_id: i64) -> Result<u64, StateError> {
    let result = sqlx::query(
        "UPDATE task_instance SET status = 'ERROR_FATAL', status_date = now()
         WHERE workflow_run_id = $1 AND status = 'KILL_SELF'",
    )
    .bind(workflow_run_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn terminate_task_instances(pool: &PgPool, workflow_run_id: i64) -> Result<(), StateError> {
    sqlx::query(
        "UPDATE task_instance SET status = 'KILL_SELF', status_date = now()
         WHERE workflow_run_id = $1 AND status IN ('QUEUED', 'INSTANTIATED', 'LAUNCHED', 'RUNNING')",
    )
    .bind(workflow_run_id)
    .execute(pool)
    .await?;
    Ok(())
}
