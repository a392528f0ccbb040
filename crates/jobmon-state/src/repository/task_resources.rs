//! TaskResources dedup-by-hash (§3, §8): binding an identical resource spec
//! twice returns the same id.

use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::StateError;
use crate::models::TaskResources;

pub fn compute_hash(queue_id: i64, requested_resources: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(queue_id.to_le_bytes());
    hasher.update(requested_resources.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn bind(
    pool: &PgPool,
    queue_id: i64,
    task_resources_type_id: i64,
    requested_resources: &serde_json::Value,
) -> Result<i64, StateError> {
    let hash = compute_hash(queue_id, requested_resources);

    if let Some(existing) = find_by_hash(pool, &hash).await? {
        return Ok(existing.id);
    }

    let row: TaskResources = sqlx::query_as(
        "INSERT INTO task_resources (queue_id, task_resources_type_id, requested_resources, resources_hash)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (resources_hash) DO UPDATE SET resources_hash = EXCLUDED.resources_hash
         RETURNING *",
    )
    .bind(queue_id)
    .bind(task_resources_type_id)
    .bind(requested_resources)
    .bind(&hash)
    .fetch_one(pool)
    .await?;

    Ok(row.id)
}

pub async fn find_by_hash(pool: &PgPool, hash: &str) -> Result<Option<TaskResources>, StateError> {
    let row = sqlx::query_as("SELECT * FROM task_resources WHERE resources_hash = $1")
        .bind(hash)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find(pool: &PgPool, id: i64) -> Result<TaskResources, StateError> {
    sqlx::query_as("SELECT * FROM task_resources WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(StateError::NotFound {
            entity: "task_resources",
            id,
        })
}
