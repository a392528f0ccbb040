use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("state service call failed: {0}")]
    Client(#[from] jobmon_core::error::ClientError),

    #[error("plugin error: {0}")]
    Plugin(#[from] jobmon_core::error::PluginError),

    #[error("distributor is no longer alive")]
    DistributorNotAlive,
}
