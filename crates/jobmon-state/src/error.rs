//! State-service error taxonomy (§7), mapped to HTTP statuses at the axum
//! boundary the way the teacher's `api::handlers` map `EngineError` variants.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("malformed request: {0}")]
    InvalidUsage(String),

    /// A truly invalid FSM edge (not an untimely one, which is dropped, not raised).
    #[error("invalid state transition for {entity} {id}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        id: i64,
        from: String,
        to: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("workflow is not resumable: {0}")]
    WorkflowNotResumable(String),

    #[error("workflow {0} has no prior workflow run")]
    EmptyWorkflow(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("lock contention exhausted retries for {0}")]
    LockContentionExhausted(String),
}

impl IntoResponse for StateError {
    fn into_response(self) -> Response {
        let status = match &self {
            StateError::InvalidUsage(_) => StatusCode::BAD_REQUEST,
            StateError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            StateError::NotFound { .. } => StatusCode::NOT_FOUND,
            StateError::WorkflowNotResumable(_) => StatusCode::CONFLICT,
            StateError::EmptyWorkflow(_) => StatusCode::BAD_REQUEST,
            StateError::Database(_) | StateError::LockContentionExhausted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Whether the underlying database error text looks like lock contention
/// (`database is locked`, `could not obtain lock`, deadlock detected) — the
/// signal `TransitionService::retry` watches for (§4.2.3).
pub fn looks_like_lock_contention(err: &sqlx::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("could not obtain lock")
        || msg.contains("deadlock")
        || msg.contains("lock timeout")
}
