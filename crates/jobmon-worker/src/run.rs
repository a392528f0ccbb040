//! §4.3: drive one task instance from identity resolution through to a
//! terminal report. The entry point `jobmon-cli`'s `worker` subcommand
//! calls.

use std::path::PathBuf;
use std::time::Duration;

use jobmon_core::client::Requester;
use jobmon_core::plugin::{LogStream, WorkerNodePlugin};
use jobmon_core::wire::{LogRunningRequest, LogRunningResponse, MessageResponse, TransitionToTerminalRequest, UsageStats as WireUsageStats};
use tracing::{info, instrument};

use crate::error::WorkerError;
use crate::heartbeat::{run_with_heartbeat, HeartbeatConfig, WaitOutcome};
use crate::identity::WorkerIdentity;
use crate::spawn::{spawn, truncate_tail, SpawnSpec};

pub struct WorkerRuntimeConfig {
    pub log_dir: PathBuf,
    pub heartbeat_interval: Duration,
    pub heartbeat_buffer: f64,
    pub command_interrupt_timeout: Duration,
}

/// Runs one task instance to terminal state, per the six steps in §4.3.
/// Returns normally whether the task succeeded or failed — only
/// infrastructure failures (can't reach the server, can't spawn) surface as
/// `Err`.
#[instrument(skip(requester, plugin, config))]
pub async fn run_task_instance(
    requester: &Requester,
    plugin: &dyn WorkerNodePlugin,
    identity: &WorkerIdentity,
    config: &WorkerRuntimeConfig,
) -> Result<(), WorkerError> {
    let info_resp = identity.resolve(requester).await?;
    let task_instance_id = info_resp.task_instance_id;

    let stdout_path = plugin.logfile_path(LogStream::Stdout, &config.log_dir, &info_resp.name);
    let stderr_path = plugin.logfile_path(LogStream::Stderr, &config.log_dir, &info_resp.name);

    let next_report_increment = config.heartbeat_interval.as_secs_f64() * config.heartbeat_buffer;
    let route = format!("/task_instance/{task_instance_id}/log_running");
    let resp: LogRunningResponse = requester
        .put(&route, &LogRunningRequest { next_report_increment })
        .await?;
    if !resp.accepted {
        info!(task_instance_id, "log_running rejected, instance was killed before start");
        return Err(WorkerError::RejectedAtStart);
    }

    let mut child = spawn(SpawnSpec {
        command: &info_resp.command,
        workflow_id: info_resp.workflow_id,
        task_id: info_resp.task_id,
        task_instance_id,
        stdout_path: &stdout_path,
        stderr_path: &stderr_path,
    })
    .await?;

    let hb_cfg = HeartbeatConfig {
        interval: config.heartbeat_interval,
        buffer: config.heartbeat_buffer,
        command_interrupt_timeout: config.command_interrupt_timeout,
    };
    let outcome = run_with_heartbeat(requester, task_instance_id, &mut child, &hb_cfg).await?;

    let stderr_tail = tokio::fs::read(&stderr_path)
        .await
        .map(|bytes| truncate_tail(&bytes, jobmon_core::constants::STDERR_TAIL_BYTES))
        .unwrap_or_default();

    let (kind, error_message) = match outcome {
        WaitOutcome::Exited(status) => plugin.exit_info(status.code(), None),
        WaitOutcome::Killed => plugin.exit_info(None, Some("killed after KILL_SELF grace period")),
    };
    let plugin_usage = plugin.usage_stats();

    let route = format!("/task_instance/{task_instance_id}/transition_to_terminal");
    let body = TransitionToTerminalRequest {
        status: kind.to_task_instance_status().to_string(),
        error_message,
        stderr_log: Some(String::from_utf8_lossy(&stderr_tail).to_string()),
        usage: WireUsageStats {
            maxrss_bytes: plugin_usage.maxrss_bytes,
            user_time_sec: plugin_usage.user_time_sec,
            system_time_sec: plugin_usage.system_time_sec,
        },
    };
    let _: MessageResponse = requester.put(&route, &body).await?;

    Ok(())
}
