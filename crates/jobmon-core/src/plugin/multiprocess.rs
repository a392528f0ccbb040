//! Reference distributor plugin that runs every task instance as a local OS
//! process. Grounded on `jobmon_core/plugins/multiprocess/multiproc_distributor.py`
//! and its `multiproc_worker_node.py` counterpart — used by scenario 1's local
//! end-to-end run and by tests that don't want a real cluster.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use crate::constants::{ExitStatusKind, EXIT_INFO_CACHE_SIZE};
use crate::error::PluginError;

use super::{DistributorPlugin, RemoteExitInfo, SubmissionSpec, WorkerNodePlugin};

/// Bounded FIFO-eviction cache, the Rust equivalent of the Python
/// `LimitedSizeDict` used to keep `multiproc_distributor.py`'s exit-info
/// table from growing without limit across a long-lived distributor process.
struct ExitInfoCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, RemoteExitInfo>,
}

impl ExitInfoCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn insert(&mut self, distributor_id: String, info: RemoteExitInfo) {
        if !self.entries.contains_key(&distributor_id) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(distributor_id.clone());
        }
        self.entries.insert(distributor_id, info);
    }

    fn get(&self, distributor_id: &str) -> Option<&RemoteExitInfo> {
        self.entries.get(distributor_id)
    }
}

struct ChildHandle {
    child: tokio::process::Child,
}

/// Distributor-side plugin: spawns one `tokio::process::Child` per
/// submission and tracks it until it exits.
pub struct MultiprocessDistributor {
    children: AsyncMutex<HashMap<String, ChildHandle>>,
    exit_cache: Mutex<ExitInfoCache>,
    next_id: AsyncMutex<u64>,
}

impl Default for MultiprocessDistributor {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiprocessDistributor {
    pub fn new() -> Self {
        Self {
            children: AsyncMutex::new(HashMap::new()),
            exit_cache: Mutex::new(ExitInfoCache::new(EXIT_INFO_CACHE_SIZE)),
            next_id: AsyncMutex::new(1),
        }
    }

    async fn allocate_id(&self) -> String {
        let mut next = self.next_id.lock().await;
        let id = *next;
        *next += 1;
        format!("mp-{id}")
    }
}

#[async_trait]
impl DistributorPlugin for MultiprocessDistributor {
    fn cluster_name(&self) -> &str {
        "multiprocess"
    }

    #[instrument(skip(self, spec))]
    async fn submit(&self, spec: &SubmissionSpec) -> Result<String, PluginError> {
        let distributor_id = self.allocate_id().await;
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .env("JOB_ID", &distributor_id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(step) = spec.array_step_id {
            cmd.env("ARRAY_STEP_ID", step.to_string());
        }
        let child = cmd.spawn().map_err(PluginError::Io)?;
        debug!(distributor_id, task_instance_id = spec.task_instance_id, "spawned");
        self.children
            .lock()
            .await
            .insert(distributor_id.clone(), ChildHandle { child });
        Ok(distributor_id)
    }

    #[instrument(skip(self, distributor_ids))]
    async fn poll_exit_info(
        &self,
        distributor_ids: &[String],
    ) -> Result<HashMap<String, RemoteExitInfo>, PluginError> {
        let mut out = HashMap::new();
        let mut children = self.children.lock().await;
        for id in distributor_ids {
            if let Some(cached) = self.exit_cache.lock().unwrap().get(id) {
                out.insert(id.clone(), cached.clone());
                continue;
            }
            let Some(handle) = children.get_mut(id) else {
                continue;
            };
            if let Ok(Some(status)) = handle.child.try_wait() {
                let info = RemoteExitInfo {
                    kind: if status.success() {
                        ExitStatusKind::Done
                    } else {
                        ExitStatusKind::Error
                    },
                    error_message: (!status.success())
                        .then(|| format!("process exited with {status}")),
                };
                self.exit_cache.lock().unwrap().insert(id.clone(), info.clone());
                out.insert(id.clone(), info);
                children.remove(id);
            }
        }
        Ok(out)
    }

    async fn is_alive(&self, distributor_id: &str) -> Result<bool, PluginError> {
        let mut children = self.children.lock().await;
        match children.get_mut(distributor_id) {
            Some(handle) => Ok(handle.child.try_wait().ok().flatten().is_none()),
            None => Ok(false),
        }
    }

    async fn terminate(&self, distributor_id: &str) -> Result<(), PluginError> {
        let mut children = self.children.lock().await;
        if let Some(handle) = children.get_mut(distributor_id) {
            handle.child.start_kill().map_err(PluginError::Io)?;
        }
        Ok(())
    }
}

/// Worker-side plugin: reads the identity the distributor stamped into the
/// environment when it spawned this process.
pub struct MultiprocessWorkerNode {
    distributor_id: String,
    array_step_id: Option<i32>,
}

impl MultiprocessWorkerNode {
    pub fn from_env() -> Self {
        let distributor_id = std::env::var("JOB_ID").unwrap_or_else(|_| "unknown".to_string());
        let array_step_id = std::env::var("ARRAY_STEP_ID")
            .ok()
            .and_then(|s| s.parse().ok());
        Self {
            distributor_id,
            array_step_id,
        }
    }
}

impl WorkerNodePlugin for MultiprocessWorkerNode {
    fn distributor_id(&self) -> String {
        self.distributor_id.clone()
    }

    fn array_step_id(&self) -> Option<i32> {
        self.array_step_id
    }
}
