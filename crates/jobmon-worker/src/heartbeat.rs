//! §4.3 step 5: the heartbeat loop interleaved with waiting on the child
//! process. Single-threaded cooperative, the way the orchestrator and
//! distributor loops are (§5).

use std::time::Duration;

use jobmon_core::client::Requester;
use jobmon_core::wire::LogHeartbeatTiResponse;
use tokio::process::Child;
use tracing::{info, warn};

use crate::error::WorkerError;

pub struct HeartbeatConfig {
    pub interval: Duration,
    pub buffer: f64,
    pub command_interrupt_timeout: Duration,
}

pub enum WaitOutcome {
    Exited(std::process::ExitStatus),
    Killed,
}

/// Runs until the child exits or the server signals KILL_SELF via a
/// heartbeat reply, in which case the child is sent SIGTERM and, after
/// `command_interrupt_timeout`, SIGKILL (§4.3 step 5, §5 "Cancellation").
pub async fn run_with_heartbeat(
    requester: &Requester,
    task_instance_id: i64,
    child: &mut Child,
    cfg: &HeartbeatConfig,
) -> Result<WaitOutcome, WorkerError> {
    loop {
        tokio::select! {
            status = child.wait() => {
                return Ok(WaitOutcome::Exited(status?));
            }
            _ = tokio::time::sleep(cfg.interval) => {
                let next_report_increment = cfg.interval.as_secs_f64() * cfg.buffer;
                let route = format!("/task_instance/{task_instance_id}/log_heartbeat");
                let body = jobmon_core::wire::LogHeartbeatTiRequest { next_report_increment };
                match requester.put::<_, LogHeartbeatTiResponse>(&route, &body).await {
                    Ok(resp) if resp.status == "KILL_SELF" => {
                        info!(task_instance_id, "received KILL_SELF, terminating child");
                        return Ok(terminate(child, cfg.command_interrupt_timeout).await?);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(task_instance_id, error = %e, "heartbeat failed, will retry next interval"),
                }
            }
        }
    }
}

async fn terminate(child: &mut Child, timeout: Duration) -> Result<WaitOutcome, WorkerError> {
    // tokio::process::Child::start_kill only sends SIGKILL; SIGTERM first,
    // escalating to SIGKILL after the grace period, needs libc directly.
    #[cfg(unix)]
    if let Some(id) = child.id() {
        unsafe {
            libc::kill(id as libc::pid_t, libc::SIGTERM);
        }
    }
    let waited = tokio::time::timeout(timeout, child.wait()).await;
    match waited {
        Ok(Ok(status)) => Ok(WaitOutcome::Exited(status)),
        _ => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(WaitOutcome::Killed)
        }
    }
}
