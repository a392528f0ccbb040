//! Task bind and query operations (§6 `PUT /task/bind_tasks_no_args`,
//! `/task/bind_task_args`, `GET /workflow/get_tasks/{id}`,
//! `POST /workflow/{id}/task_status_updates`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use jobmon_core::constants::TaskStatus;
use jobmon_core::wire::{TaskBindSpec, WireTask};
use sqlx::PgPool;

use crate::error::StateError;
use crate::models::Task;

pub struct BoundTask {
    pub task_id: i64,
    pub status: TaskStatus,
}

/// Tasks are uniquely identified within a workflow by (node_id,
/// task_args_hash) (§3); binding an existing (node_id, task_args_hash) pair
/// returns the existing row instead of inserting a duplicate.
pub async fn bind_tasks_no_args(
    pool: &PgPool,
    workflow_id: i64,
    mark_created: bool,
    tasks: &HashMap<String, TaskBindSpec>,
) -> Result<HashMap<String, BoundTask>, StateError> {
    let mut txn = pool.begin().await?;
    let mut out = HashMap::with_capacity(tasks.len());

    for (key, spec) in tasks {
        let existing: Option<Task> = sqlx::query_as(
            "SELECT * FROM task WHERE workflow_id = $1 AND node_id = $2 AND task_args_hash = $3",
        )
        .bind(workflow_id)
        .bind(spec.node_id)
        .bind(&spec.task_args_hash)
        .fetch_optional(&mut *txn)
        .await?;

        let row = match existing {
            Some(row) => row,
            None => {
                sqlx::query_as(
                    "INSERT INTO task
                        (workflow_id, node_id, array_id, task_args_hash, task_resources_id,
                         name, command, status, num_attempts, max_attempts, reset_if_running,
                         resource_scales, fallback_queues, status_date)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $11, $12, now())
                     RETURNING *",
                )
                .bind(workflow_id)
                .bind(spec.node_id)
                .bind(spec.array_id)
                .bind(&spec.task_args_hash)
                .bind(spec.task_resources_id)
                .bind(&spec.name)
                .bind(&spec.command)
                .bind(TaskStatus::Registering.to_string())
                .bind(spec.max_attempts)
                .bind(spec.reset_if_running)
                .bind(&spec.resource_scales)
                .bind(serde_json::to_value(&spec.fallback_queues).unwrap_or_default())
                .fetch_one(&mut *txn)
                .await?
            }
        };
        out.insert(
            key.clone(),
            BoundTask {
                task_id: row.id,
                status: row.status(),
            },
        );
    }

    txn.commit().await?;

    if mark_created {
        crate::repository::workflow::mark_created(pool, workflow_id).await?;
    }

    Ok(out)
}

pub async fn bind_task_args(pool: &PgPool, bindings: &[(i64, i64, String)]) -> Result<(), StateError> {
    for (task_id, arg_id, value) in bindings {
        sqlx::query(
            "INSERT INTO task_arg (task_id, arg_id, value) VALUES ($1, $2, $3)
             ON CONFLICT (task_id, arg_id) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(task_id)
        .bind(arg_id)
        .bind(value)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn find(pool: &PgPool, task_id: i64) -> Result<Task, StateError> {
    sqlx::query_as("SELECT * FROM task WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StateError::NotFound {
            entity: "task",
            id: task_id,
        })
}

/// Paged task fetch for `build_from_workflow_id` (§4.5.2): chunk by
/// ascending id, excluding already-DONE tasks server-side.
pub async fn get_tasks_page(
    pool: &PgPool,
    workflow_id: i64,
    max_task_id: i64,
    chunk_size: i64,
) -> Result<HashMap<i64, WireTask>, StateError> {
    let rows: Vec<(i64, i64, Option<i64>, String, i32, serde_json::Value, serde_json::Value, serde_json::Value, String, String, i32)> = sqlx::query_as(
        "SELECT t.id, t.node_id, t.array_id, t.status, t.max_attempts, t.resource_scales, t.fallback_queues,
                COALESCE(tr.requested_resources, '{}'::jsonb), COALESCE(cq.name, ''), COALESCE(ct.name, ''),
                COALESCE(a.max_concurrently_running, w.max_concurrently_running)
         FROM task t
         JOIN workflow w ON w.id = t.workflow_id
         LEFT JOIN array a ON a.id = t.array_id
         LEFT JOIN task_resources tr ON tr.id = t.task_resources_id
         LEFT JOIN cluster_queue cq ON cq.id = tr.queue_id
         LEFT JOIN cluster_type ct ON ct.id = cq.cluster_id
         WHERE t.workflow_id = $1 AND t.id > $2 AND t.status != 'DONE'
         ORDER BY t.id ASC
         LIMIT $3",
    )
    .bind(workflow_id)
    .bind(max_task_id)
    .bind(chunk_size)
    .fetch_all(pool)
    .await?;

    let mut out = HashMap::with_capacity(rows.len());
    for (id, node_id, array_id, status, max_attempts, resource_scales, fallback_queues, requested_resources, queue_name, cluster_name, max_concurrently_running) in rows {
        let fallback_queues: Vec<String> = serde_json::from_value(fallback_queues).unwrap_or_default();
        out.insert(
            id,
            WireTask {
                node_id,
                array_id,
                status,
                max_attempts,
                resource_scales,
                fallback_queues,
                requested_resources,
                cluster_name,
                queue_name,
                max_concurrently_running,
            },
        );
    }
    Ok(out)
}

/// All (node_id, upstream_node_id) edges for a workflow's DAG, fetched once
/// by the resume-path builder (§4.5.2).
pub async fn get_edges(pool: &PgPool, workflow_id: i64) -> Result<Vec<(i64, i64)>, StateError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT DISTINCT e.node_id, e.upstream_node_id FROM edge e
         WHERE e.node_id IN (SELECT node_id FROM task WHERE workflow_id = $1)",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Incremental or full sync of task status buckets (§4.5.2 step "Status
/// sync"). `since = None` performs a full sync.
pub async fn task_status_updates(
    pool: &PgPool,
    workflow_id: i64,
    since: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, HashMap<String, Vec<i64>>), StateError> {
    let rows: Vec<(i64, String)> = match since {
        Some(ts) => {
            sqlx::query_as("SELECT id, status FROM task WHERE workflow_id = $1 AND status_date > $2")
                .bind(workflow_id)
                .bind(ts)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT id, status FROM task WHERE workflow_id = $1")
                .bind(workflow_id)
                .fetch_all(pool)
                .await?
        }
    };

    let mut by_status: HashMap<String, Vec<i64>> = HashMap::new();
    for (id, status) in rows {
        by_status.entry(status).or_default().push(id);
    }
    Ok((Utc::now(), by_status))
}
