//! §4.5.1: `SwarmState`, the orchestrator's single piece of centralized
//! in-memory state for one workflow run. Every mutation goes through
//! `apply_update` so the reachable states stay auditable — grounded on the
//! teacher's `WorkflowExecutor` owning all execution state itself rather
//! than scattering it across call frames.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use jobmon_core::constants::{TaskInstanceStatus, TaskStatus, WorkflowRunStatus};

use crate::swarm_task::SwarmTask;

#[derive(Debug, Clone, Default)]
pub struct ArrayInfo {
    pub max_concurrently_running: i32,
}

/// An immutable record of proposed changes to `SwarmState`. Multiple updates
/// merge with *other*-wins precedence: later calls to `apply_update` win
/// over earlier ones for any field both set (§4.5.1).
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub task_status_changes: HashMap<i64, TaskStatus>,
    pub workflow_run_status: Option<WorkflowRunStatus>,
    pub max_concurrently_running: Option<i32>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl StateUpdate {
    pub fn task_status(task_id: i64, status: TaskStatus) -> Self {
        let mut u = Self::default();
        u.task_status_changes.insert(task_id, status);
        u
    }
}

pub struct SwarmState {
    pub tasks: HashMap<i64, SwarmTask>,
    pub arrays: HashMap<i64, ArrayInfo>,
    status_buckets: HashMap<TaskStatus, HashSet<i64>>,
    pub ready_to_run: VecDeque<i64>,
    pub task_resources_cache: HashMap<String, i64>,
    pub workflow_run_status: WorkflowRunStatus,
    pub max_concurrently_running: i32,
    pub last_sync: Option<DateTime<Utc>>,
    pub num_previously_complete: usize,
}

impl SwarmState {
    pub fn new(max_concurrently_running: i32, workflow_run_status: WorkflowRunStatus) -> Self {
        Self {
            tasks: HashMap::new(),
            arrays: HashMap::new(),
            status_buckets: HashMap::new(),
            ready_to_run: VecDeque::new(),
            task_resources_cache: HashMap::new(),
            workflow_run_status,
            max_concurrently_running,
            last_sync: None,
            num_previously_complete: 0,
        }
    }

    /// Insert a task and index it into its status bucket. Builder-only; use
    /// `apply_update` for every mutation after the initial build (§4.5.2).
    pub fn insert_task(&mut self, task: SwarmTask) {
        self.status_buckets.entry(task.status).or_default().insert(task.task_id);
        self.tasks.insert(task.task_id, task);
    }

    pub fn bucket(&self, status: TaskStatus) -> &HashSet<i64> {
        static EMPTY: std::sync::OnceLock<HashSet<i64>> = std::sync::OnceLock::new();
        self.status_buckets
            .get(&status)
            .unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    /// Tasks counting against the workflow-wide concurrency cap (§3, §8).
    pub fn active_task_count(&self) -> usize {
        TASK_ACTIVE_STATUSES.iter().map(|s| self.bucket(*s).len()).sum()
    }

    pub fn active_task_count_in_array(&self, array_id: i64) -> usize {
        TASK_ACTIVE_STATUSES
            .iter()
            .flat_map(|s| self.bucket(*s).iter())
            .filter(|id| self.tasks.get(id).and_then(|t| t.array_id) == Some(array_id))
            .count()
    }

    /// Apply a `StateUpdate`, moving tasks between status buckets and
    /// keeping `ready_to_run` consistent. Later updates win (§4.5.1).
    pub fn apply_update(&mut self, update: StateUpdate) {
        for (task_id, new_status) in update.task_status_changes {
            if let Some(task) = self.tasks.get_mut(&task_id) {
                let old_status = task.status;
                if old_status != new_status {
                    self.status_buckets.entry(old_status).or_default().remove(&task_id);
                    self.status_buckets.entry(new_status).or_default().insert(task_id);
                    task.status = new_status;
                }
            }
        }
        if let Some(status) = update.workflow_run_status {
            self.workflow_run_status = status;
        }
        if let Some(max) = update.max_concurrently_running {
            self.max_concurrently_running = max;
        }
        if let Some(sync) = update.last_sync {
            self.last_sync = Some(sync);
        }
    }

    /// §4.5.4 step 4: a task just went DONE; walk its downstreams and queue
    /// any whose upstreams are now all satisfied.
    pub fn propagate_completion(&mut self, done_task_id: i64) {
        let downstreams = match self.tasks.get(&done_task_id) {
            Some(t) => t.downstreams.clone(),
            None => return,
        };
        for downstream_id in downstreams {
            let ready = if let Some(downstream) = self.tasks.get_mut(&downstream_id) {
                downstream.num_upstreams_done += 1;
                downstream.is_ready()
            } else {
                false
            };
            if ready {
                self.ready_to_run.push_back(downstream_id);
            }
        }
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn done_ids(&self) -> HashSet<i64> {
        self.bucket(TaskStatus::Done).clone()
    }

    pub fn failed_ids(&self) -> HashSet<i64> {
        self.bucket(TaskStatus::ErrorFatal).clone()
    }
}

const TASK_ACTIVE_STATUSES: [TaskStatus; 4] = [
    TaskStatus::Queued,
    TaskStatus::Instantiating,
    TaskStatus::Launched,
    TaskStatus::Running,
];

/// Task-instance statuses that count against concurrency caps, re-exported
/// here since the scheduler's capacity math is phrased in task-instance
/// terms on the wire but task terms in-memory (§4.5.3, §8).
pub fn counts_toward_active(status: TaskInstanceStatus) -> bool {
    status.is_active()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_id: i64, status: TaskStatus) -> SwarmTask {
        SwarmTask {
            task_id,
            array_id: None,
            status,
            max_attempts: 3,
            num_attempts: 0,
            resource_scales: serde_json::json!({}),
            fallback_queues: vec![],
            requested_resources: serde_json::json!({}),
            task_resources_id: None,
            cluster_name: "dummy".into(),
            queue_name: "default".into(),
            upstreams: vec![],
            downstreams: vec![],
            num_upstreams_done: 0,
            scale_cursor: 0,
        }
    }

    #[test]
    fn insert_task_indexes_into_its_status_bucket() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.insert_task(task(1, TaskStatus::Queued));
        assert!(state.bucket(TaskStatus::Queued).contains(&1));
        assert_eq!(state.active_task_count(), 1);
    }

    #[test]
    fn apply_update_moves_a_task_between_buckets() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.insert_task(task(1, TaskStatus::Queued));
        state.apply_update(StateUpdate::task_status(1, TaskStatus::Running));
        assert!(!state.bucket(TaskStatus::Queued).contains(&1));
        assert!(state.bucket(TaskStatus::Running).contains(&1));
        assert_eq!(state.tasks[&1].status, TaskStatus::Running);
    }

    #[test]
    fn apply_update_on_unknown_task_is_a_silent_no_op() {
        // mirrors the FSM's untimely-transition rule: a stale update racing
        // against a task that's already gone shouldn't panic.
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.apply_update(StateUpdate::task_status(999, TaskStatus::Running));
        assert!(state.tasks.is_empty());
    }

    #[test]
    fn later_update_wins_when_merging_fields() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.apply_update(StateUpdate {
            max_concurrently_running: Some(5),
            ..Default::default()
        });
        state.apply_update(StateUpdate {
            max_concurrently_running: Some(20),
            ..Default::default()
        });
        assert_eq!(state.max_concurrently_running, 20);
    }

    #[test]
    fn propagate_completion_readies_a_downstream_with_one_upstream() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        let mut upstream = task(1, TaskStatus::Done);
        upstream.downstreams = vec![2];
        let mut downstream = task(2, TaskStatus::Registering);
        downstream.upstreams = vec![1];
        state.insert_task(upstream);
        state.insert_task(downstream);

        state.propagate_completion(1);

        assert_eq!(state.tasks[&2].num_upstreams_done, 1);
        assert_eq!(state.ready_to_run.front(), Some(&2));
    }

    #[test]
    fn propagate_completion_does_not_ready_a_task_with_unfinished_siblings() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        let mut up1 = task(1, TaskStatus::Done);
        up1.downstreams = vec![3];
        let up2 = task(2, TaskStatus::Running);
        let mut downstream = task(3, TaskStatus::Registering);
        downstream.upstreams = vec![1, 2];
        state.insert_task(up1);
        state.insert_task(up2);
        state.insert_task(downstream);

        state.propagate_completion(1);

        assert_eq!(state.tasks[&3].num_upstreams_done, 1);
        assert!(state.ready_to_run.is_empty());
    }

    #[test]
    fn active_task_count_in_array_only_counts_that_array() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        let mut in_array = task(1, TaskStatus::Running);
        in_array.array_id = Some(100);
        let mut other_array = task(2, TaskStatus::Running);
        other_array.array_id = Some(200);
        state.insert_task(in_array);
        state.insert_task(other_array);
        assert_eq!(state.active_task_count_in_array(100), 1);
    }

    #[test]
    fn all_tasks_terminal_is_false_with_any_non_terminal_task() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.insert_task(task(1, TaskStatus::Done));
        state.insert_task(task(2, TaskStatus::Running));
        assert!(!state.all_tasks_terminal());
        state.apply_update(StateUpdate::task_status(2, TaskStatus::Done));
        assert!(state.all_tasks_terminal());
    }
}
