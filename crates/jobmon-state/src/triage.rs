//! Triage sweep (§4.2.6): the server-side route the swarm calls
//! periodically to demote overdue task instances. Split into
//! select-then-update phases — a single large UPDATE has been observed to
//! deadlock under MySQL, per the original implementation's comment on this
//! exact sweep.

use crate::error::StateError;
use sqlx::PgPool;

/// Flips RUNNING instances with `report_by_date <= now()` to TRIAGING, and
/// LAUNCHED instances past their deadline to NO_HEARTBEAT — but only the
/// latter when `status_date` is older than one heartbeat interval, guarding
/// against racing with an instance that was just retried (§4.2.6).
///
/// The heartbeat-interval window is exposed as a single config key
/// (`heartbeat.triage_guard_interval_s`); see the §9 Open Question recorded
/// in DESIGN.md.
pub async fn triage_sweep(
    pool: &PgPool,
    workflow_run_id: i64,
    guard_interval_s: f64,
) -> Result<u64, StateError> {
    let running_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM task_instance
         WHERE workflow_run_id = $1 AND status = 'RUNNING' AND report_by_date <= now()",
    )
    .bind(workflow_run_id)
    .fetch_all(pool)
    .await?;

    if !running_ids.is_empty() {
        sqlx::query("UPDATE task_instance SET status = 'TRIAGING', status_date = now() WHERE id = ANY($1)")
            .bind(&running_ids)
            .execute(pool)
            .await?;
    }

    let launched_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM task_instance
         WHERE workflow_run_id = $1 AND status = 'LAUNCHED' AND report_by_date <= now()
           AND status_date < now() - ($2 || ' seconds')::interval",
    )
    .bind(workflow_run_id)
    .bind(guard_interval_s.to_string())
    .fetch_all(pool)
    .await?;

    if !launched_ids.is_empty() {
        sqlx::query("UPDATE task_instance SET status = 'NO_HEARTBEAT', status_date = now() WHERE id = ANY($1)")
            .bind(&launched_ids)
            .execute(pool)
            .await?;
    }

    Ok(running_ids.len() as u64 + launched_ids.len() as u64)
}
