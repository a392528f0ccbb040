//! §4.5.2: construct a `SwarmState` either from an in-memory blueprint of a
//! freshly bound workflow, or by paging the state service for a resume.
//! Both paths end up wiring the same upstream/downstream references and
//! computing the same initial ready set, factored into `wire_into_state`.

use std::collections::HashMap;

use jobmon_core::constants::{TaskStatus, GET_TASKS_CHUNK_SIZE};
use jobmon_core::wire::WireTask;
use tracing::info;

use crate::error::SwarmError;
use crate::gateway::ServerGateway;
use crate::state::{ArrayInfo, SwarmState};
use crate::swarm_task::SwarmTask;

/// One task as already known in-memory right after a fresh bind — the same
/// fields `WireTask` carries, so `build_from_workflow` and
/// `build_from_workflow_id` share their wiring logic.
#[derive(Debug, Clone)]
pub struct TaskBlueprint {
    pub task_id: i64,
    pub node_id: i64,
    pub array_id: Option<i64>,
    pub status: TaskStatus,
    pub max_attempts: i32,
    pub resource_scales: serde_json::Value,
    pub fallback_queues: Vec<String>,
    pub requested_resources: serde_json::Value,
    pub task_resources_id: Option<i64>,
    pub cluster_name: String,
    pub queue_name: String,
    pub max_concurrently_running: i32,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowBlueprint {
    pub workflow_max_concurrently_running: i32,
    pub tasks: Vec<TaskBlueprint>,
    /// (node_id, upstream_node_id) pairs.
    pub edges: Vec<(i64, i64)>,
}

/// In-memory construction for a freshly bound workflow (§4.5.2).
pub fn build_from_workflow(wf: WorkflowBlueprint) -> SwarmState {
    let mut state = SwarmState::new(
        wf.workflow_max_concurrently_running,
        jobmon_core::constants::WorkflowRunStatus::Bound,
    );
    wire_into_state(&mut state, wf.tasks, &wf.edges);
    state
}

/// Resume path: fetch workflow metadata, then page `get_tasks` until empty,
/// filtering DONE tasks server-side, emitting heartbeats during long paging
/// so the reaper doesn't kill the run mid-build (§4.5.2).
pub async fn build_from_workflow_id(
    gateway: &ServerGateway,
    workflow_id: i64,
    workflow_run_id: i64,
) -> Result<SwarmState, SwarmError> {
    let max_concurrently_running = gateway.get_max_concurrently_running(workflow_id).await?;
    let edges = gateway.get_edges(workflow_id).await?.edges;

    let mut all_tasks: HashMap<i64, WireTask> = HashMap::new();
    let mut max_task_id = 0i64;
    loop {
        let page = gateway
            .get_tasks_page(workflow_id, max_task_id, GET_TASKS_CHUNK_SIZE as i64)
            .await?;
        if page.tasks.is_empty() {
            break;
        }
        max_task_id = page.tasks.keys().copied().max().unwrap_or(max_task_id).max(max_task_id);
        let page_len = page.tasks.len();
        all_tasks.extend(page.tasks);
        info!(workflow_id, fetched = all_tasks.len(), "paging tasks for resume");
        // §4.5.2: keep the run alive across a long paging session.
        let _ = gateway.log_heartbeat(workflow_run_id, "RUNNING", 60.0).await;
        if page_len < GET_TASKS_CHUNK_SIZE {
            break;
        }
    }

    let mut state = SwarmState::new(
        max_concurrently_running,
        jobmon_core::constants::WorkflowRunStatus::Bound,
    );

    let blueprints: Vec<TaskBlueprint> = all_tasks
        .into_iter()
        .map(|(task_id, wt)| TaskBlueprint {
            task_id,
            node_id: wt.node_id,
            array_id: wt.array_id,
            status: wt.status.parse().unwrap_or(TaskStatus::Registering),
            max_attempts: wt.max_attempts,
            resource_scales: wt.resource_scales,
            fallback_queues: wt.fallback_queues,
            requested_resources: wt.requested_resources,
            task_resources_id: None,
            cluster_name: wt.cluster_name,
            queue_name: wt.queue_name,
            max_concurrently_running: wt.max_concurrently_running,
        })
        .collect();

    wire_into_state(&mut state, blueprints, &edges);
    Ok(state)
}

fn wire_into_state(state: &mut SwarmState, tasks: Vec<TaskBlueprint>, edges: &[(i64, i64)]) {
    // node_id -> task_ids sharing that node (array siblings share a node).
    let mut by_node: HashMap<i64, Vec<i64>> = HashMap::new();
    for t in &tasks {
        by_node.entry(t.node_id).or_default().push(t.task_id);
    }

    // task_id -> (upstream task_ids, downstream task_ids), derived from the
    // node-level DAG by fanning each edge out across every task sharing its
    // endpoints.
    let mut upstreams: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut downstreams: HashMap<i64, Vec<i64>> = HashMap::new();
    for &(node_id, upstream_node_id) in edges {
        let Some(downstream_tasks) = by_node.get(&node_id) else { continue };
        let Some(upstream_tasks) = by_node.get(&upstream_node_id) else { continue };
        for &d in downstream_tasks {
            for &u in upstream_tasks {
                upstreams.entry(d).or_default().push(u);
                downstreams.entry(u).or_default().push(d);
            }
        }
    }

    for array_id in tasks.iter().filter_map(|t| t.array_id) {
        state.arrays.entry(array_id).or_insert_with(|| ArrayInfo {
            max_concurrently_running: tasks
                .iter()
                .find(|t| t.array_id == Some(array_id))
                .map(|t| t.max_concurrently_running)
                .unwrap_or(i32::MAX),
        });
    }

    for t in tasks {
        let task_upstreams = upstreams.remove(&t.task_id).unwrap_or_default();
        let task_downstreams = downstreams.remove(&t.task_id).unwrap_or_default();
        state.insert_task(SwarmTask {
            task_id: t.task_id,
            array_id: t.array_id,
            status: t.status,
            max_attempts: t.max_attempts,
            num_attempts: 0,
            resource_scales: t.resource_scales,
            fallback_queues: t.fallback_queues,
            requested_resources: t.requested_resources,
            task_resources_id: t.task_resources_id,
            cluster_name: t.cluster_name,
            queue_name: t.queue_name,
            upstreams: task_upstreams,
            downstreams: task_downstreams,
            num_upstreams_done: 0,
            scale_cursor: 0,
        });
    }

    // compute_initial_upstream_done_counts (§4.5.2): tasks with already-DONE
    // upstreams (a resumed, partially-complete workflow) must count
    // correctly or they never become ready.
    let done_ids: Vec<i64> = state.tasks.values().filter(|t| t.status == TaskStatus::Done).map(|t| t.task_id).collect();
    state.num_previously_complete += done_ids.len();
    for task_id in state.tasks.keys().copied().collect::<Vec<_>>() {
        let count = state.tasks[&task_id]
            .upstreams
            .iter()
            .filter(|u| done_ids.contains(u))
            .count();
        if let Some(t) = state.tasks.get_mut(&task_id) {
            t.num_upstreams_done = count;
        }
    }
    for task_id in state.tasks.keys().copied().collect::<Vec<_>>() {
        if state.tasks[&task_id].is_ready() {
            state.ready_to_run.push_back(task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint(task_id: i64, node_id: i64, status: TaskStatus) -> TaskBlueprint {
        TaskBlueprint {
            task_id,
            node_id,
            array_id: None,
            status,
            max_attempts: 3,
            resource_scales: serde_json::json!({}),
            fallback_queues: vec![],
            requested_resources: serde_json::json!({}),
            task_resources_id: None,
            cluster_name: "dummy".into(),
            queue_name: "default".into(),
            max_concurrently_running: 10,
        }
    }

    #[test]
    fn a_source_task_is_ready_immediately() {
        let wf = WorkflowBlueprint {
            workflow_max_concurrently_running: 10,
            tasks: vec![blueprint(1, 1, TaskStatus::Registering)],
            edges: vec![],
        };
        let state = build_from_workflow(wf);
        assert_eq!(state.ready_to_run.front(), Some(&1));
    }

    #[test]
    fn a_task_with_an_unfinished_upstream_is_not_ready() {
        let wf = WorkflowBlueprint {
            workflow_max_concurrently_running: 10,
            tasks: vec![
                blueprint(1, 1, TaskStatus::Registering),
                blueprint(2, 2, TaskStatus::Registering),
            ],
            edges: vec![(2, 1)],
        };
        let state = build_from_workflow(wf);
        assert!(state.ready_to_run.is_empty());
        assert_eq!(state.tasks[&2].upstreams, vec![1]);
        assert_eq!(state.tasks[&1].downstreams, vec![2]);
    }

    #[test]
    fn a_resumed_task_whose_upstream_is_already_done_counts_as_satisfied() {
        let wf = WorkflowBlueprint {
            workflow_max_concurrently_running: 10,
            tasks: vec![
                blueprint(1, 1, TaskStatus::Done),
                blueprint(2, 2, TaskStatus::Registering),
            ],
            edges: vec![(2, 1)],
        };
        let state = build_from_workflow(wf);
        assert_eq!(state.tasks[&2].num_upstreams_done, 1);
        assert_eq!(state.ready_to_run.front(), Some(&2));
        assert_eq!(state.num_previously_complete, 1);
    }

    #[test]
    fn array_siblings_sharing_a_node_each_get_the_same_upstream_fan_out() {
        // two tasks instantiated from the same array node both depend on the
        // same upstream task once the node-level edge is fanned out.
        let mut sibling_a = blueprint(2, 20, TaskStatus::Registering);
        sibling_a.array_id = Some(1000);
        let mut sibling_b = blueprint(3, 20, TaskStatus::Registering);
        sibling_b.array_id = Some(1000);
        let wf = WorkflowBlueprint {
            workflow_max_concurrently_running: 10,
            tasks: vec![blueprint(1, 10, TaskStatus::Done), sibling_a, sibling_b],
            edges: vec![(20, 10)],
        };
        let state = build_from_workflow(wf);
        assert_eq!(state.tasks[&2].num_upstreams_done, 1);
        assert_eq!(state.tasks[&3].num_upstreams_done, 1);
        assert!(state.ready_to_run.contains(&2));
        assert!(state.ready_to_run.contains(&3));
        assert_eq!(state.arrays[&1000].max_concurrently_running, 10);
    }
}
