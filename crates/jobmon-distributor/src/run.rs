//! Top-level distributor loop (§4.4): a long-running process bound to one
//! workflow run that alternates pump/reconcile cycles with its own
//! heartbeat, on independently configurable intervals. Grounded on the
//! cooperative, single-threaded loop shape the orchestrator and worker
//! runtime both use (§5).

use std::time::Duration;

use jobmon_core::client::Requester;
use jobmon_core::plugin::DistributorPlugin;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::DistributorError;
use crate::{heartbeat, pump, reconcile};

pub struct DistributorRuntimeConfig {
    pub poll_interval: Duration,
    pub reconcile_interval: Duration,
    pub heartbeat_interval: Duration,
}

/// Runs pump/reconcile/heartbeat on their own cadences until `shutdown`
/// resolves. Each cycle's failure is logged and retried on the next tick
/// rather than ending the loop — only the caller's shutdown signal stops it,
/// matching the distributor's role as a process the swarm merely checks the
/// liveness of (§4.4, §4.5.4 step 2), not one it directly controls.
#[instrument(skip(requester, plugin, shutdown))]
pub async fn run_forever(
    requester: &Requester,
    plugin: &dyn DistributorPlugin,
    workflow_run_id: i64,
    config: &DistributorRuntimeConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), DistributorError> {
    let mut next_pump = Instant::now();
    let mut next_reconcile = Instant::now() + config.reconcile_interval;
    let mut next_heartbeat = Instant::now();

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= next_heartbeat {
            let increment = config.heartbeat_interval.as_secs_f64() * 3.0;
            if let Err(e) = heartbeat::beat(requester, workflow_run_id, increment).await {
                warn!(error = %e, "distributor heartbeat failed");
            }
            next_heartbeat = now + config.heartbeat_interval;
        }

        if now >= next_pump {
            match pump::pump(requester, plugin, workflow_run_id).await {
                Ok(summary) => info!(launched = summary.launched, errors = summary.queueing_errors, "pump cycle"),
                Err(e) => warn!(error = %e, "pump cycle failed"),
            }
            next_pump = now + config.poll_interval;
        }

        if now >= next_reconcile {
            match reconcile::reconcile(requester, plugin, workflow_run_id).await {
                Ok(summary) => info!(
                    transitioned = summary.transitioned,
                    terminated = summary.terminated,
                    "reconcile cycle"
                ),
                Err(e) => warn!(error = %e, "reconcile cycle failed"),
            }
            next_reconcile = now + config.reconcile_interval;
        }

        let sleep_until = [next_pump, next_reconcile, next_heartbeat]
            .into_iter()
            .min()
            .unwrap();
        tokio::select! {
            _ = tokio::time::sleep_until(sleep_until) => {}
            _ = shutdown.changed() => {}
        }
    }
}
