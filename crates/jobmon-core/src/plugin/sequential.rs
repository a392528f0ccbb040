//! `cluster_name = "sequential"`: runs each task instance to completion
//! in-process before returning, used by the single-machine quickstart
//! (scenario 1, §8). No concurrency, no polling — `submit` blocks until the
//! command exits and the exit info is already known by the time it returns.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::constants::ExitStatusKind;
use crate::error::PluginError;

use super::{DistributorPlugin, RemoteExitInfo, SubmissionSpec, WorkerNodePlugin};

pub struct SequentialDistributor {
    finished: Mutex<HashMap<String, RemoteExitInfo>>,
    next_id: Mutex<u64>,
}

impl Default for SequentialDistributor {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialDistributor {
    pub fn new() -> Self {
        Self {
            finished: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl DistributorPlugin for SequentialDistributor {
    fn cluster_name(&self) -> &str {
        "sequential"
    }

    async fn submit(&self, spec: &SubmissionSpec) -> Result<String, PluginError> {
        let distributor_id = {
            let mut next = self.next_id.lock().await;
            let id = *next;
            *next += 1;
            format!("seq-{id}")
        };
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&spec.command)
            .env("JOB_ID", &distributor_id)
            .output()
            .await
            .map_err(PluginError::Io)?;
        let info = RemoteExitInfo {
            kind: if output.status.success() {
                ExitStatusKind::Done
            } else {
                ExitStatusKind::Error
            },
            error_message: (!output.status.success())
                .then(|| String::from_utf8_lossy(&output.stderr).to_string()),
        };
        self.finished.lock().await.insert(distributor_id.clone(), info);
        Ok(distributor_id)
    }

    async fn poll_exit_info(
        &self,
        distributor_ids: &[String],
    ) -> Result<HashMap<String, RemoteExitInfo>, PluginError> {
        let finished = self.finished.lock().await;
        Ok(distributor_ids
            .iter()
            .filter_map(|id| finished.get(id).map(|info| (id.clone(), info.clone())))
            .collect())
    }

    async fn is_alive(&self, _distributor_id: &str) -> Result<bool, PluginError> {
        // Submission already ran to completion; never still running.
        Ok(false)
    }

    async fn terminate(&self, _distributor_id: &str) -> Result<(), PluginError> {
        Ok(())
    }
}

pub struct SequentialWorkerNode;

impl WorkerNodePlugin for SequentialWorkerNode {
    fn distributor_id(&self) -> String {
        std::env::var("JOB_ID").unwrap_or_else(|_| "unknown".to_string())
    }

    fn array_step_id(&self) -> Option<i32> {
        None
    }
}
