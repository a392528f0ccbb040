pub mod array;
pub mod task;
pub mod task_instance;
pub mod workflow;
pub mod workflow_run;

use axum::Router;

use crate::server::AppState;

/// The v3 route surface (§6). Per the §9 Open Question on v1/v2/v3
/// duplication, only v3 is implemented; see DESIGN.md for the compatibility
/// shim decision.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v3", v3_routes())
        .with_state(state)
}

fn v3_routes() -> Router<AppState> {
    Router::new()
        .merge(workflow::router())
        .merge(workflow_run::router())
        .merge(array::router())
        .merge(task::router())
        .merge(task_instance::router())
}
