//! Row types for every persisted entity (§3, §6). Field names follow the
//! columns used throughout `transition_service.py`, `task_instance.py`, and
//! `workflow_run.py` in `original_source/`.

use chrono::{DateTime, Utc};
use jobmon_core::constants::{TaskInstanceStatus, TaskStatus, WorkflowRunStatus, WorkflowStatus};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub tool_version_id: i64,
    pub dag_hash: String,
    pub workflow_args_hash: String,
    pub task_hash: String,
    pub workflow_hash: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub workflow_args: Option<String>,
    pub status: String,
    pub max_concurrently_running: i32,
    pub created_date: Option<DateTime<Utc>>,
    pub status_date: DateTime<Utc>,
}

impl Workflow {
    pub fn status(&self) -> WorkflowStatus {
        self.status.parse().expect("persisted status is valid")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub workflow_id: i64,
    pub user: String,
    pub jobmon_version: String,
    pub status: String,
    pub heartbeat_date: DateTime<Utc>,
    pub status_date: DateTime<Utc>,
    pub created_date: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn status(&self) -> WorkflowRunStatus {
        self.status.parse().expect("persisted status is valid")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Array {
    pub id: i64,
    pub workflow_id: i64,
    pub task_template_version_id: i64,
    pub name: String,
    pub max_concurrently_running: i32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub task_template_version_id: i64,
    pub node_args_hash: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Edge {
    pub node_id: i64,
    pub upstream_node_id: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub workflow_id: i64,
    pub node_id: i64,
    pub array_id: Option<i64>,
    pub task_args_hash: String,
    pub task_resources_id: Option<i64>,
    pub name: String,
    pub command: String,
    pub status: String,
    pub num_attempts: i32,
    pub max_attempts: i32,
    pub reset_if_running: bool,
    pub resource_scales: serde_json::Value,
    pub fallback_queues: serde_json::Value,
    pub status_date: DateTime<Utc>,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        self.status.parse().expect("persisted status is valid")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskArg {
    pub task_id: i64,
    pub arg_id: i64,
    pub value: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskAttribute {
    pub task_id: i64,
    pub attribute_type: String,
    pub value: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskResources {
    pub id: i64,
    pub queue_id: i64,
    pub task_resources_type_id: i64,
    pub requested_resources: serde_json::Value,
    pub resources_hash: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClusterType {
    pub id: i64,
    pub name: String,
    pub package_location: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClusterQueue {
    pub id: i64,
    pub cluster_id: i64,
    pub name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: i64,
    pub task_id: i64,
    pub workflow_run_id: i64,
    pub array_id: Option<i64>,
    pub array_batch_num: Option<i32>,
    pub array_step_id: Option<i32>,
    pub task_resources_id: Option<i64>,
    pub distributor_id: Option<String>,
    pub status: String,
    pub report_by_date: Option<DateTime<Utc>>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub maxrss_bytes: Option<i64>,
    pub user_time_sec: Option<f64>,
    pub system_time_sec: Option<f64>,
    pub status_date: DateTime<Utc>,
}

impl TaskInstance {
    pub fn status(&self) -> TaskInstanceStatus {
        self.status.parse().expect("persisted status is valid")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskInstanceErrorLog {
    pub id: i64,
    pub task_instance_id: i64,
    pub description: String,
    pub error_time: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskStatusAudit {
    pub id: i64,
    pub task_id: i64,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}
