//! Request/response DTOs for the state service's HTTP surface (§6).
//!
//! Shared between `jobmon-state` (which deserializes requests and serializes
//! responses) and the clients in `jobmon-swarm` / `jobmon-distributor` /
//! `jobmon-worker` (which do the opposite), so the wire shape only has one
//! definition — the same reuse the teacher gets from sharing `engine::Workflow`
//! between the `api` and `engine` crates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{TaskInstanceStatus, WorkflowRunStatus};

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindWorkflowRequest {
    pub tool_version_id: i64,
    pub dag_hash: String,
    pub workflow_args_hash: String,
    pub task_hash: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub workflow_args: Option<String>,
    pub max_concurrently_running: i32,
    pub workflow_attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindWorkflowResponse {
    pub workflow_id: i64,
    pub status: String,
    pub newly_created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBindSpec {
    pub node_id: i64,
    pub task_args_hash: String,
    pub array_id: Option<i64>,
    pub task_resources_id: Option<i64>,
    pub name: String,
    pub command: String,
    pub max_attempts: i32,
    pub reset_if_running: bool,
    pub resource_scales: serde_json::Value,
    pub fallback_queues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindTasksNoArgsRequest {
    pub workflow_id: i64,
    pub mark_created: bool,
    pub tasks: HashMap<String, TaskBindSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundTask {
    pub task_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindTasksNoArgsResponse {
    pub tasks: HashMap<String, BoundTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskArgBinding {
    pub task_id: i64,
    pub arg_id: i64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindTaskArgsRequest {
    pub task_args: Vec<TaskArgBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindResourcesRequest {
    pub queue_id: i64,
    pub task_resources_type_id: i64,
    pub requested_resources: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindResourcesResponse {
    pub task_resources_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetResumeRequest {
    pub reset_running_jobs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsResumableResponse {
    pub workflow_is_resumable: bool,
    pub pending_kill_self: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusUpdatesRequest {
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusUpdatesResponse {
    pub time: DateTime<Utc>,
    pub tasks_by_status: HashMap<String, Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTasksRequest {
    pub max_task_id: i64,
    pub chunk_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTask {
    pub node_id: i64,
    pub array_id: Option<i64>,
    pub status: String,
    pub max_attempts: i32,
    pub resource_scales: serde_json::Value,
    pub fallback_queues: Vec<String>,
    pub requested_resources: serde_json::Value,
    pub cluster_name: String,
    pub queue_name: String,
    pub max_concurrently_running: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTasksResponse {
    pub tasks: HashMap<i64, WireTask>,
}

/// (node_id -> upstream_node_id) pairs for the whole workflow's DAG, fetched
/// once by the resume-path builder so it can wire up swarm-task references
/// without the per-task page carrying its own edge list (§4.5.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWorkflowEdgesResponse {
    pub edges: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxConcurrentlyRunningResponse {
    pub max_concurrently_running: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMaxConcurrentlyRunningRequest {
    pub max_tasks: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateArrayRequest {
    pub workflow_id: i64,
    pub task_template_version_id: i64,
    pub max_concurrently_running: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateArrayResponse {
    pub array_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTaskBatchRequest {
    pub task_ids: Vec<i64>,
    pub task_resources_id: i64,
    pub workflow_run_id: i64,
    pub cluster_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTaskBatchResponse {
    pub tasks_by_status: HashMap<String, Vec<i64>>,
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRunRequest {
    pub workflow_id: i64,
    pub user: String,
    pub jobmon_version: String,
    pub next_report_increment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRunResponse {
    pub workflow_run_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogHeartbeatRequest {
    pub status: String,
    pub next_report_increment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// ---------------------------------------------------------------------------
// TaskInstance (worker / distributor facing; §4.1, §4.3, §4.4)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstanceInfoResponse {
    pub task_instance_id: i64,
    pub task_id: i64,
    pub workflow_run_id: i64,
    pub workflow_id: i64,
    pub name: String,
    pub command: String,
    pub requested_resources: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRunningRequest {
    pub next_report_increment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRunningResponse {
    pub accepted: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogHeartbeatTiRequest {
    pub next_report_increment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogHeartbeatTiResponse {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub maxrss_bytes: Option<i64>,
    pub user_time_sec: Option<f64>,
    pub system_time_sec: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionToTerminalRequest {
    pub status: String,
    pub error_message: Option<String>,
    pub stderr_log: Option<String>,
    pub usage: UsageStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDistributorIdRequest {
    pub distributor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDistributorIdsRequest {
    /// task_instance_id -> distributor_id
    pub ids: HashMap<i64, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTaskInstance {
    pub task_instance_id: i64,
    pub distributor_id: String,
    pub status: TaskInstanceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTaskInstancesResponse {
    pub instances: Vec<ActiveTaskInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTaskInstance {
    pub task_instance_id: i64,
    pub task_id: i64,
    pub array_id: Option<i64>,
    pub array_batch_num: Option<i32>,
    pub array_step_id: Option<i32>,
    pub task_resources_id: i64,
    pub name: String,
    pub command: String,
    pub requested_resources: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTaskInstancesResponse {
    pub instances: Vec<QueuedTaskInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSelfTaskInstance {
    pub task_instance_id: i64,
    pub distributor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSelfTaskInstancesResponse {
    pub instances: Vec<KillSelfTaskInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorHeartbeatRequest {
    pub next_report_increment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorAliveResponse {
    pub alive: bool,
}

pub fn workflow_run_status_str(s: WorkflowRunStatus) -> String {
    s.to_string()
}
