//! §4.4 "Reconcile LAUNCHED/RUNNING" and "Respond to KILL_SELF": ask the
//! plugin what happened to instances the server still thinks are active,
//! and terminate the ones the FSM has asked to be killed.

use jobmon_core::client::Requester;
use jobmon_core::constants::ExitStatusKind;
use jobmon_core::plugin::DistributorPlugin;
use jobmon_core::wire::{
    ActiveTaskInstancesResponse, KillSelfTaskInstancesResponse, MessageResponse,
    TransitionToTerminalRequest, UsageStats,
};
use tracing::{instrument, warn};

use crate::error::DistributorError;

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub transitioned: usize,
    pub terminated: usize,
}

#[instrument(skip(requester, plugin))]
pub async fn reconcile(
    requester: &Requester,
    plugin: &dyn DistributorPlugin,
    workflow_run_id: i64,
) -> Result<ReconcileSummary, DistributorError> {
    let mut summary = ReconcileSummary::default();

    let route = format!("/workflow_run/{workflow_run_id}/active_task_instances");
    let active: ActiveTaskInstancesResponse = requester.get(&route).await?;
    let distributor_ids: Vec<String> = active
        .instances
        .iter()
        .map(|ti| ti.distributor_id.clone())
        .collect();

    if !distributor_ids.is_empty() {
        // Entries absent from the result are still running; `NotAvailable`
        // cases are left for the server's triage sweep to flip to
        // NO_HEARTBEAT rather than guessed at here (§4.4, §4.2.6).
        let exited = plugin.poll_exit_info(&distributor_ids).await?;
        for ti in &active.instances {
            let Some(info) = exited.get(&ti.distributor_id) else {
                continue;
            };
            transition_to_terminal(requester, ti.task_instance_id, info.kind, info.error_message.as_deref())
                .await?;
            summary.transitioned += 1;
        }
    }

    let route = format!("/workflow_run/{workflow_run_id}/kill_self_task_instances");
    let kill_self: KillSelfTaskInstancesResponse = requester.get(&route).await?;
    for ti in kill_self.instances {
        if let Err(e) = plugin.terminate(&ti.distributor_id).await {
            warn!(task_instance_id = ti.task_instance_id, error = %e, "failed to terminate KILL_SELF instance");
            continue;
        }
        summary.terminated += 1;
    }

    Ok(summary)
}

async fn transition_to_terminal(
    requester: &Requester,
    task_instance_id: i64,
    kind: ExitStatusKind,
    error_message: Option<&str>,
) -> Result<(), DistributorError> {
    let route = format!("/task_instance/{task_instance_id}/transition_to_terminal");
    let body = TransitionToTerminalRequest {
        status: kind.to_task_instance_status().to_string(),
        error_message: error_message.map(str::to_string),
        stderr_log: None,
        usage: UsageStats::default(),
    };
    let _: MessageResponse = requester.put(&route, &body).await?;
    Ok(())
}
