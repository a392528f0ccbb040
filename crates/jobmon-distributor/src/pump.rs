//! §4.4 "Pump QUEUED -> LAUNCHED": poll the state service for queued task
//! instances, group them by (array_id, task_resources_id), submit each
//! group to the cluster plugin, and record the result.

use std::collections::HashMap;

use jobmon_core::client::Requester;
use jobmon_core::constants::MAX_BATCH_SIZE;
use jobmon_core::plugin::{DistributorPlugin, SubmissionSpec};
use jobmon_core::wire::{
    LogDistributorIdRequest, MessageResponse, QueuedTaskInstance, QueuedTaskInstancesResponse,
};
use tracing::{debug, instrument, warn};

use crate::error::DistributorError;

/// How many instances were moved to LAUNCHED vs. flagged with a queueing
/// error this cycle, for the caller's logging.
#[derive(Debug, Default)]
pub struct PumpSummary {
    pub launched: usize,
    pub queueing_errors: usize,
}

#[instrument(skip(requester, plugin))]
pub async fn pump(
    requester: &Requester,
    plugin: &dyn DistributorPlugin,
    workflow_run_id: i64,
) -> Result<PumpSummary, DistributorError> {
    let route = format!("/workflow_run/{workflow_run_id}/queued_task_instances");
    let resp: QueuedTaskInstancesResponse = requester.get(&route).await?;

    let mut summary = PumpSummary::default();
    for batch in group_by_array_and_resources(resp.instances) {
        let specs: Vec<SubmissionSpec> = batch.iter().map(to_submission_spec).collect();
        match plugin.submit_array_batch(&specs).await {
            Ok(assigned) => {
                for spec in &specs {
                    if let Some(distributor_id) = assigned.get(&spec.task_instance_id) {
                        log_distributor_id(requester, spec.task_instance_id, distributor_id).await?;
                        summary.launched += 1;
                    } else {
                        queueing_error(requester, spec.task_instance_id, "plugin did not return a distributor id").await?;
                        summary.queueing_errors += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, batch_size = specs.len(), "batch submission failed, flagging queueing errors");
                for spec in &specs {
                    queueing_error(requester, spec.task_instance_id, &e.to_string()).await?;
                    summary.queueing_errors += 1;
                }
            }
        }
    }
    debug!(launched = summary.launched, errors = summary.queueing_errors, "pump cycle complete");
    Ok(summary)
}

fn to_submission_spec(ti: &QueuedTaskInstance) -> SubmissionSpec {
    SubmissionSpec {
        task_instance_id: ti.task_instance_id,
        name: ti.name.clone(),
        command: ti.command.clone(),
        requested_resources: ti.requested_resources.clone(),
        array_id: ti.array_id,
        array_batch_num: ti.array_batch_num,
        array_step_id: ti.array_step_id,
    }
}

/// Greedy grouping by (array_id, task_resources_id), capped at
/// `MAX_BATCH_SIZE` per group, mirroring the scheduler's own batching rule
/// (§4.5.3) so a distributor batch never exceeds what the server queued at
/// once.
fn group_by_array_and_resources(
    instances: Vec<QueuedTaskInstance>,
) -> Vec<Vec<QueuedTaskInstance>> {
    let mut groups: HashMap<(Option<i64>, i64), Vec<QueuedTaskInstance>> = HashMap::new();
    for ti in instances {
        groups
            .entry((ti.array_id, ti.task_resources_id))
            .or_default()
            .push(ti);
    }
    groups
        .into_values()
        .flat_map(|group| group.chunks(MAX_BATCH_SIZE).map(|c| c.to_vec()).collect::<Vec<_>>())
        .collect()
}

async fn log_distributor_id(
    requester: &Requester,
    task_instance_id: i64,
    distributor_id: &str,
) -> Result<(), DistributorError> {
    let route = format!("/task_instance/{task_instance_id}/log_distributor_id");
    let body = LogDistributorIdRequest {
        distributor_id: distributor_id.to_string(),
    };
    let _: MessageResponse = requester.put(&route, &body).await?;
    Ok(())
}

async fn queueing_error(
    requester: &Requester,
    task_instance_id: i64,
    message: &str,
) -> Result<(), DistributorError> {
    let route = format!("/task_instance/{task_instance_id}/queueing_error");
    let body = MessageResponse {
        message: message.to_string(),
    };
    let _: MessageResponse = requester.put(&route, &body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(array_id: Option<i64>, task_resources_id: i64, id: i64) -> QueuedTaskInstance {
        QueuedTaskInstance {
            task_instance_id: id,
            task_id: id,
            array_id,
            array_batch_num: None,
            array_step_id: None,
            task_resources_id,
            name: format!("task-{id}"),
            command: "echo 1".to_string(),
            requested_resources: serde_json::json!({}),
        }
    }

    #[test]
    fn groups_by_array_and_resources() {
        let instances = vec![
            instance(Some(1), 10, 1),
            instance(Some(1), 10, 2),
            instance(Some(2), 10, 3),
            instance(None, 20, 4),
        ];
        let groups = group_by_array_and_resources(instances);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().any(|g| g.len() == 2));
    }

    #[test]
    fn splits_oversized_groups_at_max_batch_size() {
        let instances: Vec<_> = (0..(MAX_BATCH_SIZE + 10) as i64)
            .map(|id| instance(Some(1), 10, id))
            .collect();
        let groups = group_by_array_and_resources(instances);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len().max(groups[1].len()), MAX_BATCH_SIZE);
    }
}
