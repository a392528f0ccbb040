//! Background janitor (§4.2.5), ported from `workflow_reaper.py`'s
//! `monitor_forever` loop: reap workflow runs whose heartbeat has gone
//! silent, and correct workflows left FAILED when every task is actually
//! DONE.

use std::time::Duration;

use jobmon_core::constants::{WorkflowRunStatus, WorkflowStatus};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::StateError;
use crate::repository::{workflow, workflow_run};

/// Page size for the inconsistent-workflow scan (§4.2.5 "paged chunks with a
/// wrapping cursor").
const SCAN_PAGE_SIZE: i64 = 200;

pub struct Reaper {
    pool: PgPool,
    poll_interval: Duration,
    heartbeat_buffer: f64,
    /// §9 Open Question: the original's wrapping cursor was class-level
    /// state (`WorkflowReaper._current_starting_row`); kept here as instance
    /// state instead, scoped to a single reaper task the way every other
    /// piece of mutable loop state in this port is.
    scan_cursor: i64,
}

impl Reaper {
    pub fn new(pool: PgPool, poll_interval: Duration, heartbeat_buffer: f64) -> Self {
        Self {
            pool,
            poll_interval,
            heartbeat_buffer,
            scan_cursor: 0,
        }
    }

    #[instrument(skip(self))]
    pub async fn monitor_forever(mut self) {
        loop {
            if let Err(e) = self.reap_lost_heartbeats().await {
                warn!(error = %e, "reaper: heartbeat sweep failed");
            }
            if let Err(e) = self.fix_inconsistent_workflows().await {
                warn!(error = %e, "reaper: inconsistency sweep failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Workflow runs whose `heartbeat_date + buffer*interval < now` are dead
    /// (§4.2.5): LINKING -> ABORTED, {COLD,HOT}_RESUME -> TERMINATED,
    /// RUNNING -> ERROR.
    async fn reap_lost_heartbeats(&self) -> Result<(), StateError> {
        let dead: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, status FROM workflow_run
             WHERE status IN ('LINKING', 'COLD_RESUME', 'HOT_RESUME', 'RUNNING')
               AND heartbeat_date + ($1 || ' seconds')::interval < now()",
        )
        .bind(self.heartbeat_buffer)
        .fetch_all(&self.pool)
        .await?;

        for (id, status) in dead {
            let from: WorkflowRunStatus = status.parse().expect("persisted status is valid");
            let to = match from {
                WorkflowRunStatus::Linking => WorkflowRunStatus::Aborted,
                WorkflowRunStatus::ColdResume | WorkflowRunStatus::HotResume => {
                    WorkflowRunStatus::Terminated
                }
                WorkflowRunStatus::Running => WorkflowRunStatus::Error,
                _ => continue,
            };
            info!(workflow_run_id = id, %from, %to, "reaping lost heartbeat");
            if let Err(e) = workflow_run::transition(&self.pool, id, to).await {
                warn!(workflow_run_id = id, error = %e, "reaper: transition failed");
            }
        }
        Ok(())
    }

    /// Corrects a workflow left FAILED when every task finished DONE after
    /// the fact (a race between the last task instance's report and the
    /// workflow-run's own terminal transition). Scans in pages with a
    /// wrapping cursor to bound query time on large workflow tables.
    async fn fix_inconsistent_workflows(&mut self) -> Result<(), StateError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM workflow WHERE status = 'FAILED' AND id > $1 ORDER BY id ASC LIMIT $2",
        )
        .bind(self.scan_cursor)
        .bind(SCAN_PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        if ids.is_empty() {
            self.scan_cursor = 0;
            return Ok(());
        }
        self.scan_cursor = *ids.last().unwrap();

        for id in ids {
            match workflow::is_inconsistent_failed_but_all_done(&self.pool, id).await {
                Ok(true) => {
                    info!(workflow_id = id, "promoting inconsistent FAILED workflow to DONE");
                    if let Err(e) = workflow::update_status(&self.pool, id, WorkflowStatus::Done).await {
                        warn!(workflow_id = id, error = %e, "reaper: promotion failed");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(workflow_id = id, error = %e, "reaper: inconsistency check failed"),
            }
        }
        Ok(())
    }
}
