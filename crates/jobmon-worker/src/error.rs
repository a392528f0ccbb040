use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("state service call failed: {0}")]
    Client(#[from] jobmon_core::error::ClientError),

    #[error("plugin error: {0}")]
    Plugin(#[from] jobmon_core::error::PluginError),

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("server rejected log_running, instance was killed before it could start")]
    RejectedAtStart,
}
