//! In-memory task node as the orchestrator sees it (§4.5.1). One `SwarmTask`
//! per server-side `Task` row, wired to its upstream/downstream siblings so
//! completion propagation (§4.5.4 step 4) never has to ask the server "what
//! depends on this."

use jobmon_core::constants::TaskStatus;

#[derive(Debug, Clone)]
pub struct SwarmTask {
    pub task_id: i64,
    pub array_id: Option<i64>,
    pub status: TaskStatus,
    pub max_attempts: i32,
    pub num_attempts: i32,
    pub resource_scales: serde_json::Value,
    pub fallback_queues: Vec<String>,
    pub requested_resources: serde_json::Value,
    pub task_resources_id: Option<i64>,
    pub cluster_name: String,
    pub queue_name: String,
    pub upstreams: Vec<i64>,
    pub downstreams: Vec<i64>,
    pub num_upstreams_done: usize,
    /// Position consumed from a `Sequence`-shaped resource scale, advanced
    /// one step per ADJUSTING_RESOURCES retry (§4.5.4 step 6, §9).
    pub scale_cursor: usize,
}

impl SwarmTask {
    pub fn is_ready(&self) -> bool {
        self.status == TaskStatus::Registering && self.num_upstreams_done >= self.upstreams.len()
    }
}
