//! §4.4 "Heartbeat": the distributor's own liveness signal, independent of
//! any task instance heartbeat, so the swarm's `distributor_alive` check
//! (§4.5.4 step 2) has something to read.

use jobmon_core::client::Requester;
use jobmon_core::wire::{DistributorHeartbeatRequest, MessageResponse};
use tracing::instrument;

use crate::error::DistributorError;

#[instrument(skip(requester))]
pub async fn beat(
    requester: &Requester,
    workflow_run_id: i64,
    next_report_increment: f64,
) -> Result<(), DistributorError> {
    let route = format!("/workflow_run/{workflow_run_id}/distributor_heartbeat");
    let body = DistributorHeartbeatRequest { next_report_increment };
    let _: MessageResponse = requester.post(&route, &body).await?;
    Ok(())
}
