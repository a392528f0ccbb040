//! Shared error kinds (§7). Each crate defines its own error enum for its own
//! concerns and wraps these with `#[from]` at the boundary, the way the
//! teacher's `EngineError::Database(#[from] db::DbError)` does.

use thiserror::Error;

/// Errors surfaced by the HTTP client (`Requester`) shared by swarm,
/// distributor, and worker.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {route} failed: {source}")]
    Request {
        route: String,
        #[source]
        source: reqwest::Error,
    },

    /// Any non-200 status from the state service (§6, §7).
    #[error("unexpected status {status} from {route}: {body}")]
    InvalidResponse {
        route: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response body from {route}: {source}")]
    Decode {
        route: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors a cluster plugin (C1) can raise (§4.1, §7).
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("submission failed: {0}")]
    SubmitFailed(String),

    #[error("remote exit info not available for distributor id {0}")]
    RemoteExitInfoNotAvailable(String),

    #[error("plugin io error: {0}")]
    Io(#[from] std::io::Error),
}

/// DAG-validation errors surfaced through bind (client-side, out of core
/// scope per §1, but named here since `jobmon-swarm`'s builder still needs
/// to report them when resuming tasks that reference a missing upstream).
#[derive(Debug, Error)]
pub enum DagError {
    #[error("workflow graph contains a cycle")]
    CyclicGraph,

    #[error("duplicate node args for node {0}")]
    DuplicateNodeArgs(i64),

    #[error("task references a node dependency that does not exist: {0}")]
    NodeDependencyNotExist(i64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),
}
