//! `TransitionService`: the single place every FSM transition is mediated
//! (§4.2.3). Ported from `transition_service.py`'s locking discipline:
//! - single TI-driven transitions take `FOR UPDATE NOWAIT` on the instance
//!   row, then the task row, in that order;
//! - bulk task transitions take `FOR UPDATE SKIP LOCKED` so unrelated
//!   batches don't serialize behind each other;
//! - lock-contention errors retry up to five times with exponential backoff
//!   starting at 2 ms, each retry beginning with a rollback.
//!
//! Each public method owns its transaction end to end: `pool.begin()` on
//! entry, `commit()` on success, `rollback()` before a retry. A caller makes
//! one method call per logical transition and treats it as atomic; nothing
//! is threaded through from the route handler.

use std::time::Duration;

use chrono::Utc;
use jobmon_core::constants::{TaskInstanceStatus, TaskStatus};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{instrument, warn};

use crate::error::{looks_like_lock_contention, StateError};
use crate::fsm::{task, task_instance as ti_fsm};
use crate::models::{Task, TaskInstance};

const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct TiTransitionOutcome {
    pub applied: bool,
    pub task_instance_status: TaskInstanceStatus,
    pub task_status: Option<TaskStatus>,
}

#[derive(Debug, Default, Clone)]
pub struct BulkOutcome {
    pub transitioned: Vec<i64>,
    pub invalid: Vec<i64>,
    pub locked: Vec<i64>,
    pub not_found: Vec<i64>,
}

pub struct TransitionService {
    pool: PgPool,
}

impl TransitionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Transition one task instance, cascading to its task when the edge is
    /// valid. Untimely edges are logged and dropped (`applied = false`,
    /// current status returned unchanged); invalid edges raise.
    #[instrument(skip(self))]
    pub async fn transition_task_instance(
        &self,
        task_instance_id: i64,
        to: TaskInstanceStatus,
        error_message: Option<&str>,
    ) -> Result<TiTransitionOutcome, StateError> {
        let mut attempt = 0;
        loop {
            match self
                .try_transition_task_instance(task_instance_id, to, error_message)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(StateError::Database(e)) if looks_like_lock_contention(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(task_instance_id, attempt, "lock contention, retrying");
                    tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_transition_task_instance(
        &self,
        task_instance_id: i64,
        to: TaskInstanceStatus,
        error_message: Option<&str>,
    ) -> Result<TiTransitionOutcome, StateError> {
        let mut txn = self.pool.begin().await?;

        let ti: TaskInstance = sqlx::query_as(
            "SELECT * FROM task_instance WHERE id = $1 FOR UPDATE NOWAIT",
        )
        .bind(task_instance_id)
        .fetch_optional(&mut *txn)
        .await?
        .ok_or(StateError::NotFound {
            entity: "task_instance",
            id: task_instance_id,
        })?;

        let from = ti.status();
        match ti_fsm::classify(from, to) {
            ti_fsm::EdgeKind::Invalid => {
                txn.rollback().await?;
                return Err(StateError::InvalidStateTransition {
                    entity: "task_instance",
                    id: task_instance_id,
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            ti_fsm::EdgeKind::Untimely => {
                txn.rollback().await?;
                warn!(task_instance_id, %from, %to, "untimely task instance transition dropped");
                return Ok(TiTransitionOutcome {
                    applied: false,
                    task_instance_status: from,
                    task_status: None,
                });
            }
            ti_fsm::EdgeKind::Valid => {}
        }

        let task: Task = sqlx::query_as("SELECT * FROM task WHERE id = $1 FOR UPDATE NOWAIT")
            .bind(ti.task_id)
            .fetch_optional(&mut *txn)
            .await?
            .ok_or(StateError::NotFound {
                entity: "task",
                id: ti.task_id,
            })?;

        sqlx::query("UPDATE task_instance SET status = $1, status_date = now() WHERE id = $2")
            .bind(to.to_string())
            .bind(task_instance_id)
            .execute(&mut *txn)
            .await?;

        if let Some(msg) = error_message {
            sqlx::query(
                "INSERT INTO task_instance_error_log (task_instance_id, description, error_time) VALUES ($1, $2, now())",
            )
            .bind(task_instance_id)
            .bind(msg)
            .execute(&mut *txn)
            .await?;
        }

        let new_task_status = self.cascade_to_task(&mut txn, &task, to).await?;

        self.insert_audit(&mut txn, task.id, Some(task.status()), new_task_status)
            .await?;

        txn.commit().await?;

        Ok(TiTransitionOutcome {
            applied: true,
            task_instance_status: to,
            task_status: new_task_status,
        })
    }

    /// Cascade a task-instance transition to the owning task (§4.2.2).
    /// Returns the task's resulting status, or `None` if the task gate
    /// rejected (and therefore did not move).
    async fn cascade_to_task(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        owner: &Task,
        ti_to: TaskInstanceStatus,
    ) -> Result<Option<TaskStatus>, StateError> {
        let from = owner.status();
        let target = if ti_to == TaskInstanceStatus::Done {
            TaskStatus::Done
        } else if ti_to.is_error() {
            task::transition_after_task_instance_error(owner.num_attempts, owner.max_attempts)
        } else if matches!(ti_to, TaskInstanceStatus::Launched) {
            TaskStatus::Launched
        } else if matches!(ti_to, TaskInstanceStatus::Running) {
            TaskStatus::Running
        } else {
            return Ok(None);
        };

        if !task::is_valid(from, target) {
            return Ok(None);
        }

        sqlx::query("UPDATE task SET status = $1, status_date = now() WHERE id = $2")
            .bind(target.to_string())
            .bind(owner.id)
            .execute(&mut **txn)
            .await?;

        Ok(Some(target))
    }

    async fn insert_audit(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        task_id: i64,
        previous: Option<TaskStatus>,
        new: Option<TaskStatus>,
    ) -> Result<(), StateError> {
        let Some(new) = new else { return Ok(()) };
        sqlx::query(
            "INSERT INTO task_status_audit (task_id, previous_status, new_status, entered_at) VALUES ($1, $2, $3, now())",
        )
        .bind(task_id)
        .bind(previous.map(|s| s.to_string()))
        .bind(new.to_string())
        .execute(&mut **txn)
        .await?;
        Ok(())
    }

    /// Bulk task transition (e.g. the scheduler's REGISTERING/ADJUSTING_RESOURCES
    /// →QUEUED gate, §4.5.3). `from` lists every source status this call
    /// accepts; a row sitting in any other status is reported `invalid`.
    /// `SKIP LOCKED` so unrelated in-flight batches never block this one;
    /// rows held by another writer land in `locked`, not retried here — the
    /// caller decides whether to re-submit them next tick.
    #[instrument(skip(self, task_ids, from))]
    pub async fn transition_task_batch(
        &self,
        task_ids: &[i64],
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<BulkOutcome, StateError> {
        if task_ids.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let mut attempt = 0;
        loop {
            match self.try_transition_task_batch(task_ids, from, to).await {
                Ok(outcome) => return Ok(outcome),
                Err(StateError::Database(e)) if looks_like_lock_contention(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "bulk lock contention, retrying");
                    tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_transition_task_batch(
        &self,
        task_ids: &[i64],
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<BulkOutcome, StateError> {
        let mut txn = self.pool.begin().await?;
        let mut outcome = BulkOutcome::default();

        // Resolve existence first (unlocked) so a row absent from the
        // SKIP LOCKED result set below can be told apart from one held by
        // another writer.
        let existing_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM task WHERE id = ANY($1)")
                .bind(task_ids)
                .fetch_all(&mut *txn)
                .await?;
        let existing: std::collections::HashSet<i64> = existing_ids.into_iter().collect();
        outcome.not_found = task_ids
            .iter()
            .copied()
            .filter(|id| !existing.contains(id))
            .collect();

        let rows: Vec<Task> = sqlx::query_as(
            "SELECT * FROM task WHERE id = ANY($1) FOR UPDATE SKIP LOCKED",
        )
        .bind(task_ids)
        .fetch_all(&mut *txn)
        .await?;

        let locked_rows: std::collections::HashSet<i64> = rows.iter().map(|t| t.id).collect();
        outcome.locked = task_ids
            .iter()
            .copied()
            .filter(|id| existing.contains(id) && !locked_rows.contains(id))
            .collect();

        let mut eligible = Vec::new();
        for row in rows {
            if from.contains(&row.status()) {
                eligible.push((row.id, row.status()));
            } else {
                outcome.invalid.push(row.id);
            }
        }

        if !eligible.is_empty() {
            let eligible_ids: Vec<i64> = eligible.iter().map(|(id, _)| *id).collect();
            sqlx::query("UPDATE task SET status = $1, status_date = now() WHERE id = ANY($2)")
                .bind(to.to_string())
                .bind(&eligible_ids)
                .execute(&mut *txn)
                .await?;

            for (id, from_status) in &eligible {
                sqlx::query(
                    "INSERT INTO task_status_audit (task_id, previous_status, new_status, entered_at) VALUES ($1, $2, $3, now())",
                )
                .bind(id)
                .bind(from_status.to_string())
                .bind(to.to_string())
                .execute(&mut *txn)
                .await?;
            }
            outcome.transitioned = eligible_ids;
        }

        txn.commit().await?;
        Ok(outcome)
    }
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}
