use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("state service call failed: {0}")]
    Client(#[from] jobmon_core::error::ClientError),

    #[error("distributor is no longer alive")]
    DistributorNotAlive,

    #[error("distributor was interrupted mid-cycle")]
    DistributorInterrupted,

    #[error("per-tick scheduling timeout exceeded")]
    SchedulingTimeout,

    #[error("workflow {0} has no prior workflow run to resume")]
    EmptyWorkflow(i64),
}
