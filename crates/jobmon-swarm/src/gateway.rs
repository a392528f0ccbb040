//! `ServerGateway`: every HTTP call the swarm orchestrator makes to the
//! state service, grounded on the same `Requester` wrapper the worker and
//! distributor use (§6).

use jobmon_core::client::Requester;
use jobmon_core::wire::{
    BindResourcesRequest, BindResourcesResponse, DistributorAliveResponse, GetTasksResponse,
    GetWorkflowEdgesResponse, LogHeartbeatRequest, MaxConcurrentlyRunningResponse, MessageResponse,
    QueueTaskBatchRequest, QueueTaskBatchResponse, StatusResponse, TaskStatusUpdatesRequest,
    TaskStatusUpdatesResponse,
};

use crate::error::SwarmError;

pub struct ServerGateway {
    requester: Requester,
}

impl ServerGateway {
    pub fn new(requester: Requester) -> Self {
        Self { requester }
    }

    pub async fn log_heartbeat(
        &self,
        workflow_run_id: i64,
        status: &str,
        next_report_increment: f64,
    ) -> Result<String, SwarmError> {
        let route = format!("/workflow_run/{workflow_run_id}/log_heartbeat");
        let body = LogHeartbeatRequest {
            status: status.to_string(),
            next_report_increment,
        };
        let resp: StatusResponse = self.requester.post(&route, &body).await?;
        Ok(resp.status)
    }

    pub async fn distributor_alive(&self, workflow_run_id: i64) -> Result<bool, SwarmError> {
        let route = format!("/workflow_run/{workflow_run_id}/distributor_alive");
        let resp: DistributorAliveResponse = self.requester.get(&route).await?;
        Ok(resp.alive)
    }

    pub async fn task_status_updates(
        &self,
        workflow_id: i64,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<TaskStatusUpdatesResponse, SwarmError> {
        let route = format!("/workflow/{workflow_id}/task_status_updates");
        let body = TaskStatusUpdatesRequest { last_sync: since };
        Ok(self.requester.post(&route, &body).await?)
    }

    pub async fn get_tasks_page(
        &self,
        workflow_id: i64,
        max_task_id: i64,
        chunk_size: i64,
    ) -> Result<GetTasksResponse, SwarmError> {
        let route = format!(
            "/workflow/get_tasks/{workflow_id}?max_task_id={max_task_id}&chunk_size={chunk_size}"
        );
        Ok(self.requester.get(&route).await?)
    }

    pub async fn get_edges(&self, workflow_id: i64) -> Result<GetWorkflowEdgesResponse, SwarmError> {
        let route = format!("/workflow/{workflow_id}/get_edges");
        Ok(self.requester.get(&route).await?)
    }

    pub async fn get_max_concurrently_running(&self, workflow_id: i64) -> Result<i32, SwarmError> {
        let route = format!("/workflow/{workflow_id}/get_max_concurrently_running");
        let resp: MaxConcurrentlyRunningResponse = self.requester.get(&route).await?;
        Ok(resp.max_concurrently_running)
    }

    pub async fn bind_resources(
        &self,
        queue_id: i64,
        task_resources_type_id: i64,
        requested_resources: serde_json::Value,
    ) -> Result<i64, SwarmError> {
        let route = "/task/bind_resources";
        let body = BindResourcesRequest {
            queue_id,
            task_resources_type_id,
            requested_resources,
        };
        let resp: BindResourcesResponse = self.requester.post(route, &body).await?;
        Ok(resp.task_resources_id)
    }

    pub async fn queue_task_batch(
        &self,
        array_id: i64,
        task_ids: Vec<i64>,
        task_resources_id: i64,
        workflow_run_id: i64,
        cluster_id: i64,
    ) -> Result<std::collections::HashMap<String, Vec<i64>>, SwarmError> {
        let route = format!("/array/{array_id}/queue_task_batch");
        let body = QueueTaskBatchRequest {
            task_ids,
            task_resources_id,
            workflow_run_id,
            cluster_id,
        };
        let resp: QueueTaskBatchResponse = self.requester.post(&route, &body).await?;
        Ok(resp.tasks_by_status)
    }

    pub async fn set_status_for_triaging(&self, workflow_run_id: i64) -> Result<(), SwarmError> {
        let route = format!("/workflow_run/{workflow_run_id}/set_status_for_triaging");
        let _: MessageResponse = self.requester.post(&route, &serde_json::json!({})).await?;
        Ok(())
    }

    pub async fn terminate_task_instances(&self, workflow_run_id: i64) -> Result<(), SwarmError> {
        let route = format!("/workflow_run/{workflow_run_id}/terminate_task_instances");
        let _: MessageResponse = self.requester.put(&route, &serde_json::json!({})).await?;
        Ok(())
    }
}
