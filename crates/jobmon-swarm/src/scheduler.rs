//! §4.5.3: greedy batching of `ready_to_run` into `queue_task_batch` calls,
//! grounded on the teacher's `engine::dag` iterative, no-recursion style —
//! generalized here from graph traversal to capacity-bounded batch-building.

use std::collections::{HashMap, VecDeque};

use jobmon_core::constants::{TaskStatus, MAX_BATCH_SIZE};
use tracing::{debug, instrument};

use crate::error::SwarmError;
use crate::gateway::ServerGateway;
use crate::state::{StateUpdate, SwarmState};

#[derive(Debug, Default)]
pub struct TickSummary {
    pub batches_sent: usize,
    pub tasks_queued: usize,
}

pub struct Scheduler<'a> {
    gateway: &'a ServerGateway,
    workflow_run_id: i64,
    cluster_id: i64,
    queue_ids: &'a HashMap<String, i64>,
    task_resources_type_id: i64,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        gateway: &'a ServerGateway,
        workflow_run_id: i64,
        cluster_id: i64,
        queue_ids: &'a HashMap<String, i64>,
        task_resources_type_id: i64,
    ) -> Self {
        Self {
            gateway,
            workflow_run_id,
            cluster_id,
            queue_ids,
            task_resources_type_id,
        }
    }

    /// One scheduling pass. Drains `state.ready_to_run`, requeueing any task
    /// that can't be batched this tick back to the front so arrival order is
    /// preserved across ticks (§4.5.3's `extendleft` behavior).
    #[instrument(skip(self, state))]
    pub async fn tick(&self, state: &mut SwarmState) -> Result<TickSummary, SwarmError> {
        let mut workflow_capacity = state
            .max_concurrently_running
            .saturating_sub(state.active_task_count() as i32)
            .max(0) as usize;

        let batches = self.generate_batches(state, &mut workflow_capacity);
        let mut summary = TickSummary::default();

        for batch in batches {
            let task_resources_id = self.ensure_bound(state, &batch).await?;
            let task_ids: Vec<i64> = batch.iter().map(|t| t.task_id).collect();
            let by_status = self
                .gateway
                .queue_task_batch(
                    batch[0].array_id.unwrap_or(0),
                    task_ids,
                    task_resources_id,
                    self.workflow_run_id,
                    self.cluster_id,
                )
                .await?;

            let mut update = StateUpdate::default();
            for (status_str, ids) in by_status {
                let Ok(status) = status_str.parse::<TaskStatus>() else { continue };
                for id in ids {
                    update.task_status_changes.insert(id, status);
                }
            }
            summary.batches_sent += 1;
            summary.tasks_queued += update.task_status_changes.len();
            state.apply_update(update);
        }

        debug!(
            batches = summary.batches_sent,
            queued = summary.tasks_queued,
            "scheduler tick complete"
        );
        Ok(summary)
    }

    /// Greedy-batch `ready_to_run` by (array_id, task_resources_id) respecting
    /// workflow and per-array capacity; tasks that would overflow array
    /// capacity go back to the front of the queue (§4.5.3).
    fn generate_batches(
        &self,
        state: &mut SwarmState,
        workflow_capacity: &mut usize,
    ) -> Vec<Vec<BatchedTask>> {
        let mut groups: HashMap<(Option<i64>, String), Vec<BatchedTask>> = HashMap::new();
        let mut set_aside: VecDeque<i64> = VecDeque::new();
        // Tasks taken into this tick's batches per array, debited against the
        // array's cap directly: `state`'s own active-count snapshot is only
        // updated later via `apply_update`, so it never reflects what this
        // loop has already picked up.
        let mut taken_this_tick: HashMap<i64, usize> = HashMap::new();

        while let Some(task_id) = state.ready_to_run.pop_front() {
            if *workflow_capacity == 0 {
                set_aside.push_back(task_id);
                continue;
            }
            let Some(task) = state.tasks.get(&task_id) else { continue };
            let array_capacity = task
                .array_id
                .map(|array_id| {
                    let cap = state
                        .arrays
                        .get(&array_id)
                        .map(|a| a.max_concurrently_running)
                        .unwrap_or(i32::MAX);
                    let already_taken = *taken_this_tick.get(&array_id).unwrap_or(&0) as i32;
                    cap.saturating_sub(state.active_task_count_in_array(array_id) as i32)
                        .saturating_sub(already_taken)
                        .max(0) as usize
                })
                .unwrap_or(usize::MAX);
            if array_capacity == 0 {
                set_aside.push_back(task_id);
                continue;
            }

            let key = (task.array_id, resources_key(task));
            let group = groups.entry(key).or_default();
            if group.len() >= MAX_BATCH_SIZE {
                set_aside.push_back(task_id);
                continue;
            }
            group.push(BatchedTask {
                task_id,
                array_id: task.array_id,
                cluster_name: task.cluster_name.clone(),
                queue_name: task.queue_name.clone(),
                task_resources_id: task.task_resources_id,
                requested_resources: task.requested_resources.clone(),
            });
            if let Some(array_id) = task.array_id {
                *taken_this_tick.entry(array_id).or_default() += 1;
            }
            *workflow_capacity -= 1;
        }

        // preserve arrival order: set-aside tasks go back to the front.
        for task_id in set_aside.into_iter().rev() {
            state.ready_to_run.push_front(task_id);
        }

        groups.into_values().collect()
    }

    /// Bind the batch's `TaskResources` if not already bound; idempotent per
    /// §4.5.3 ("skips if already bound").
    async fn ensure_bound(&self, state: &mut SwarmState, batch: &[BatchedTask]) -> Result<i64, SwarmError> {
        let sample = &batch[0];
        if let Some(id) = sample.task_resources_id {
            return Ok(id);
        }
        let cache_key = resources_cache_key(sample);
        if let Some(&id) = state.task_resources_cache.get(&cache_key) {
            return Ok(id);
        }
        let queue_id = *self.queue_ids.get(&sample.queue_name).unwrap_or(&0);
        let id = self
            .gateway
            .bind_resources(queue_id, self.task_resources_type_id, sample.requested_resources.clone())
            .await?;
        state.task_resources_cache.insert(cache_key, id);
        Ok(id)
    }
}

struct BatchedTask {
    task_id: i64,
    array_id: Option<i64>,
    cluster_name: String,
    queue_name: String,
    task_resources_id: Option<i64>,
    requested_resources: serde_json::Value,
}

fn resources_key(task: &crate::swarm_task::SwarmTask) -> String {
    format!("{}:{}:{}", task.cluster_name, task.queue_name, task.requested_resources)
}

fn resources_cache_key(task: &BatchedTask) -> String {
    format!("{}:{}:{}", task.cluster_name, task.queue_name, task.requested_resources)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jobmon_core::client::Requester;

    use super::*;
    use crate::state::{ArrayInfo, SwarmState};
    use crate::swarm_task::SwarmTask;

    fn scheduler(queue_ids: &HashMap<String, i64>, gateway: &ServerGateway) -> Scheduler<'_> {
        Scheduler::new(gateway, 1, 1, queue_ids, 1)
    }

    fn gateway() -> ServerGateway {
        ServerGateway::new(Requester::new("http://unused.invalid", Duration::from_secs(1)))
    }

    fn task(task_id: i64, array_id: Option<i64>) -> SwarmTask {
        SwarmTask {
            task_id,
            array_id,
            status: TaskStatus::Queued,
            max_attempts: 3,
            num_attempts: 0,
            resource_scales: serde_json::json!({}),
            fallback_queues: vec![],
            requested_resources: serde_json::json!({"cores": 1}),
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
    fn generate_batches_groups_same_resources_into_one_batch() {
        let queue_ids = HashMap::new();
        let gw = gateway();
        let sched = scheduler(&queue_ids, &gw);
        let mut state = SwarmState::new(10, jobmon_core::constants::WorkflowRunStatus::Bound);
        state.insert_task(task(1, None));
        state.insert_task(task(2, None));
        state.ready_to_run.push_back(1);
        state.ready_to_run.push_back(2);

        let mut capacity = 10usize;
        let batches = sched.generate_batches(&mut state, &mut capacity);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(capacity, 8);
        assert!(state.ready_to_run.is_empty());
    }

    #[test]
    fn generate_batches_sets_aside_tasks_once_workflow_capacity_is_exhausted() {
        let queue_ids = HashMap::new();
        let gw = gateway();
        let sched = scheduler(&queue_ids, &gw);
        let mut state = SwarmState::new(10, jobmon_core::constants::WorkflowRunStatus::Bound);
        state.insert_task(task(1, None));
        state.insert_task(task(2, None));
        state.ready_to_run.push_back(1);
        state.ready_to_run.push_back(2);

        let mut capacity = 1usize;
        let batches = sched.generate_batches(&mut state, &mut capacity);

        let queued: Vec<i64> = batches.iter().flatten().map(|t| t.task_id).collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(capacity, 0);
        // the other task goes back to the front, preserving arrival order.
        assert_eq!(state.ready_to_run.len(), 1);
    }

    #[test]
    fn generate_batches_respects_per_array_capacity() {
        let queue_ids = HashMap::new();
        let gw = gateway();
        let sched = scheduler(&queue_ids, &gw);
        let mut state = SwarmState::new(10, jobmon_core::constants::WorkflowRunStatus::Bound);
        state.arrays.insert(50, ArrayInfo { max_concurrently_running: 1 });
        // Neither task is active yet (both REGISTERING, nothing running in
        // the array already) — the cap has to come from the batches this
        // tick is itself building, not from `state`'s pre-tick snapshot.
        let mut t1 = task(1, Some(50));
        t1.status = TaskStatus::Registering;
        let mut t2 = task(2, Some(50));
        t2.status = TaskStatus::Registering;
        state.insert_task(t1);
        state.insert_task(t2);
        state.ready_to_run.push_back(1);
        state.ready_to_run.push_back(2);

        let mut capacity = 10usize;
        let batches = sched.generate_batches(&mut state, &mut capacity);

        let queued: Vec<i64> = batches.iter().flatten().map(|t| t.task_id).collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(state.ready_to_run.len(), 1);
        assert_eq!(capacity, 9);
    }

    #[tokio::test]
    async fn ensure_bound_is_idempotent_when_already_bound() {
        let queue_ids = HashMap::new();
        let gw = gateway();
        let sched = scheduler(&queue_ids, &gw);
        let mut state = SwarmState::new(10, jobmon_core::constants::WorkflowRunStatus::Bound);
        let batch = vec![BatchedTask {
            task_id: 1,
            array_id: None,
            cluster_name: "dummy".into(),
            queue_name: "default".into(),
            task_resources_id: Some(42),
            requested_resources: serde_json::json!({}),
        }];
        let id = sched.ensure_bound(&mut state, &batch).await.unwrap();
        assert_eq!(id, 42);
    }

    #[tokio::test]
    async fn ensure_bound_reuses_the_task_resources_cache() {
        let queue_ids = HashMap::new();
        let gw = gateway();
        let sched = scheduler(&queue_ids, &gw);
        let mut state = SwarmState::new(10, jobmon_core::constants::WorkflowRunStatus::Bound);
        let batch = vec![BatchedTask {
            task_id: 1,
            array_id: None,
            cluster_name: "dummy".into(),
            queue_name: "default".into(),
            task_resources_id: None,
            requested_resources: serde_json::json!({"cores": 1}),
        }];
        state.task_resources_cache.insert(resources_cache_key(&batch[0]), 7);
        let id = sched.ensure_bound(&mut state, &batch).await.unwrap();
        assert_eq!(id, 7);
    }
}
