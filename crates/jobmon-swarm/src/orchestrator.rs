//! §4.5.4–§4.5.6: the single-threaded cooperative tick loop that drives a
//! bound workflow run to a terminal state. Grounded on the teacher's
//! `engine::executor::WorkflowExecutor::run` shape (one method owning the
//! whole retry/advance loop over its own state), generalized from "run nodes
//! to completion" to the nine-step tick below.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use jobmon_core::constants::{TaskStatus, WorkflowRunStatus};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::SwarmError;
use crate::gateway::ServerGateway;
use crate::resource_scale::{apply_scale, ResourceScale};
use crate::scheduler::Scheduler;
use crate::state::{StateUpdate, SwarmState};

pub struct OrchestratorConfig {
    pub workflow_id: i64,
    pub workflow_run_id: i64,
    pub cluster_id: i64,
    pub task_resources_type_id: i64,
    pub queue_ids: HashMap<String, i64>,
    pub poll_interval: Duration,
    pub wedged_workflow_sync_interval: Duration,
    pub per_tick_scheduling_timeout: Duration,
    pub triage_interval: Duration,
    pub heartbeat_buffer: f64,
    /// §4.5.4 step 5: stop scheduling as soon as any task goes ERROR_FATAL
    /// rather than letting independent branches of the DAG run to completion.
    pub fail_fast: bool,
}

pub struct OrchestratorResult {
    pub final_status: WorkflowRunStatus,
    pub elapsed_seconds: f64,
    pub total_tasks: usize,
    pub num_done: usize,
    pub num_error_fatal: usize,
    pub task_statuses: HashMap<i64, TaskStatus>,
    pub done_ids: HashSet<i64>,
    pub failed_ids: HashSet<i64>,
    pub num_previously_complete: usize,
}

fn snapshot_result(state: &SwarmState, final_status: WorkflowRunStatus, started: Instant) -> OrchestratorResult {
    OrchestratorResult {
        final_status,
        elapsed_seconds: started.elapsed().as_secs_f64(),
        total_tasks: state.tasks.len(),
        num_done: state.bucket(TaskStatus::Done).len(),
        num_error_fatal: state.bucket(TaskStatus::ErrorFatal).len(),
        task_statuses: state.tasks.iter().map(|(id, t)| (*id, t.status)).collect(),
        done_ids: state.done_ids(),
        failed_ids: state.failed_ids(),
        num_previously_complete: state.num_previously_complete,
    }
}

/// §4.5.4's nine-step tick, driven until a terminal condition. Ctrl-C
/// handling (§4.5.5) is layered around each tick via `shutdown`.
#[instrument(skip(gateway, state, shutdown))]
pub async fn run(
    gateway: &ServerGateway,
    state: &mut SwarmState,
    config: &OrchestratorConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<OrchestratorResult, SwarmError> {
    let started = Instant::now();
    let scheduler = Scheduler::new(
        gateway,
        config.workflow_run_id,
        config.cluster_id,
        &config.queue_ids,
        config.task_resources_type_id,
    );

    let mut last_sync_at: Option<Instant> = None;
    let mut last_triage_at: Option<Instant> = None;
    let mut fatal_reason: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    state.workflow_run_status = WorkflowRunStatus::Stopped;
                    return Ok(snapshot_result(state, WorkflowRunStatus::Stopped, started));
                }
            }
        }

        // 1. Heartbeat.
        let next_report_increment = config.poll_interval.as_secs_f64() * config.heartbeat_buffer;
        let status_str = gateway
            .log_heartbeat(config.workflow_run_id, &state.workflow_run_status.to_string(), next_report_increment)
            .await?;
        if let Ok(server_status) = status_str.parse::<WorkflowRunStatus>() {
            match server_status {
                WorkflowRunStatus::Error | WorkflowRunStatus::Terminated | WorkflowRunStatus::Stopped => {
                    state.workflow_run_status = server_status;
                    return Ok(snapshot_result(state, server_status, started));
                }
                WorkflowRunStatus::ColdResume | WorkflowRunStatus::HotResume => {
                    state.workflow_run_status = WorkflowRunStatus::Terminated;
                    gateway.terminate_task_instances(config.workflow_run_id).await?;
                    return Ok(snapshot_result(state, WorkflowRunStatus::Terminated, started));
                }
                _ => {}
            }
        }

        // 2. Distributor liveness check.
        if !gateway.distributor_alive(config.workflow_run_id).await? {
            return Err(SwarmError::DistributorNotAlive);
        }

        // 3. Status sync, full if we've gone longer than the wedged-workflow
        // interval without one.
        let full_sync = last_sync_at
            .map(|t| t.elapsed() > config.wedged_workflow_sync_interval)
            .unwrap_or(true);
        let since = if full_sync { None } else { state.last_sync };
        let old_done = state.bucket(TaskStatus::Done).clone();
        let old_adjusting = state.bucket(TaskStatus::AdjustingResources).clone();
        let old_fatal = state.bucket(TaskStatus::ErrorFatal).clone();

        let sync = gateway.task_status_updates(config.workflow_id, since).await?;
        let mut update = StateUpdate::default();
        for (status_str, ids) in sync.tasks_by_status {
            let Ok(status) = status_str.parse::<TaskStatus>() else { continue };
            for id in ids {
                update.task_status_changes.insert(id, status);
            }
        }
        update.last_sync = Some(sync.time);
        state.apply_update(update);
        last_sync_at = Some(Instant::now());

        // 4. Propagate completions for every task newly DONE this sync.
        let newly_done: Vec<i64> = state
            .bucket(TaskStatus::Done)
            .iter()
            .copied()
            .filter(|id| !old_done.contains(id))
            .collect();
        for done_id in newly_done {
            state.propagate_completion(done_id);
        }

        // 5. Fail-fast on newly appeared ERROR_FATAL tasks.
        let newly_fatal: Vec<i64> = state
            .bucket(TaskStatus::ErrorFatal)
            .iter()
            .copied()
            .filter(|id| !old_fatal.contains(id))
            .collect();
        if config.fail_fast && !newly_fatal.is_empty() {
            fatal_reason = Some(format!("task(s) {newly_fatal:?} reached ERROR_FATAL"));
        }
        if let Some(reason) = &fatal_reason {
            warn!(reason, "fail_fast: stopping scheduling");
            state.workflow_run_status = WorkflowRunStatus::Error;
            return Ok(snapshot_result(state, WorkflowRunStatus::Error, started));
        }

        // 6. Adjust resources for tasks newly in ADJUSTING_RESOURCES.
        let newly_adjusting: Vec<i64> = state
            .bucket(TaskStatus::AdjustingResources)
            .iter()
            .copied()
            .filter(|id| !old_adjusting.contains(id))
            .collect();
        if !newly_adjusting.is_empty() {
            adjust_resources(gateway, state, config, &newly_adjusting).await?;
        }

        // 7. Request triage periodically.
        if last_triage_at.map(|t| t.elapsed() > config.triage_interval).unwrap_or(true) {
            gateway.set_status_for_triaging(config.workflow_run_id).await?;
            last_triage_at = Some(Instant::now());
        }

        // 8. Schedule, bounded by the per-tick timeout.
        if state.active_task_count() < state.max_concurrently_running as usize && !state.ready_to_run.is_empty() {
            match tokio::time::timeout(config.per_tick_scheduling_timeout, scheduler.tick(state)).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => warn!("scheduler tick exceeded per-tick timeout, resuming next tick"),
            }
        }

        // 9. Check termination.
        if state.all_tasks_terminal() {
            let final_status = if state.failed_ids().is_empty() {
                WorkflowRunStatus::Done
            } else {
                WorkflowRunStatus::Error
            };
            state.workflow_run_status = final_status;
            return Ok(snapshot_result(state, final_status, started));
        }
        if !has_pending_work(state) && state.ready_to_run.is_empty() {
            state.workflow_run_status = WorkflowRunStatus::Done;
            return Ok(snapshot_result(state, WorkflowRunStatus::Done, started));
        }
    }
}

fn has_pending_work(state: &SwarmState) -> bool {
    state.tasks.values().any(|t| !t.status.is_terminal())
}

async fn adjust_resources(
    gateway: &ServerGateway,
    state: &mut SwarmState,
    config: &OrchestratorConfig,
    task_ids: &[i64],
) -> Result<(), SwarmError> {
    for &task_id in task_ids {
        let Some(task) = state.tasks.get(&task_id) else { continue };
        let scales = task.resource_scales.as_object().cloned().unwrap_or_default();
        let mut resources = task.requested_resources.clone();
        let cursor = task.scale_cursor;
        if let Some(obj) = resources.as_object_mut() {
            for (key, current) in obj.iter_mut() {
                let Some(scale_value) = scales.get(key) else { continue };
                let Some(scale) = ResourceScale::parse(scale_value) else {
                    warn!(task_id, key, "resource scale has an unrecognized shape, keeping old value");
                    continue;
                };
                let Some(old) = current.as_f64() else { continue };
                match apply_scale(&scale, cursor, old) {
                    Some(new_value) => *current = Value::from(new_value),
                    None => warn!(task_id, key, "resource scale exhausted, keeping old value"),
                }
            }
        }

        let array_id = task.array_id;
        let queue_name = task.queue_name.clone();
        let fallback_queues = task.fallback_queues.clone();
        let candidate_queues: Vec<&str> = std::iter::once(queue_name.as_str())
            .chain(fallback_queues.iter().map(String::as_str))
            .collect();

        let mut bound: Option<(i64, String)> = None;
        for (i, queue_name) in candidate_queues.iter().enumerate() {
            let Some(&queue_id) = config.queue_ids.get(*queue_name) else { continue };
            let is_last = i == candidate_queues.len() - 1;
            match gateway
                .bind_resources(queue_id, config.task_resources_type_id, resources.clone())
                .await
            {
                Ok(id) => {
                    bound = Some((id, queue_name.to_string()));
                    break;
                }
                Err(e) if !is_last => {
                    warn!(task_id, queue = *queue_name, error = %e, "queue rejected adjusted resources, trying fallback");
                }
                Err(e) => return Err(e),
            }
        }
        let Some((task_resources_id, bound_queue)) = bound else {
            warn!(task_id, "no candidate queue available for adjusted resources, leaving task parked");
            continue;
        };

        let by_status = gateway
            .queue_task_batch(
                array_id.unwrap_or(0),
                vec![task_id],
                task_resources_id,
                config.workflow_run_id,
                config.cluster_id,
            )
            .await?;

        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.requested_resources = resources;
            task.task_resources_id = Some(task_resources_id);
            task.queue_name = bound_queue;
            task.scale_cursor = cursor + 1;
        }

        let mut update = StateUpdate::default();
        for (status_str, ids) in by_status {
            let Ok(status) = status_str.parse::<TaskStatus>() else { continue };
            for id in ids {
                update.task_status_changes.insert(id, status);
            }
        }
        state.apply_update(update);
    }
    info!(count = task_ids.len(), "re-queued ADJUSTING_RESOURCES tasks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use jobmon_core::constants::WorkflowRunStatus;

    use super::*;
    use crate::state::SwarmState;
    use crate::swarm_task::SwarmTask;

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
    fn has_pending_work_is_false_once_every_task_is_terminal() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.insert_task(task(1, TaskStatus::Done));
        state.insert_task(task(2, TaskStatus::ErrorFatal));
        assert!(!has_pending_work(&state));
    }

    #[test]
    fn has_pending_work_is_true_while_a_task_is_still_running() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.insert_task(task(1, TaskStatus::Done));
        state.insert_task(task(2, TaskStatus::Running));
        assert!(has_pending_work(&state));
    }

    #[test]
    fn snapshot_result_counts_done_and_error_fatal_buckets() {
        let mut state = SwarmState::new(10, WorkflowRunStatus::Bound);
        state.insert_task(task(1, TaskStatus::Done));
        state.insert_task(task(2, TaskStatus::Done));
        state.insert_task(task(3, TaskStatus::ErrorFatal));
        let result = snapshot_result(&state, WorkflowRunStatus::Error, tokio::time::Instant::now());
        assert_eq!(result.num_done, 2);
        assert_eq!(result.num_error_fatal, 1);
        assert_eq!(result.total_tasks, 3);
        assert_eq!(result.final_status, WorkflowRunStatus::Error);
    }
}
