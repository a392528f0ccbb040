//! The state service (C2, §4.2): persisted FSMs for workflow, workflow run,
//! array, task, and task instance, exposed over HTTP (§6).

pub mod error;
pub mod fsm;
pub mod models;
pub mod reaper;
pub mod repository;
pub mod routes;
pub mod server;
pub mod transition;
pub mod triage;

pub use reaper::Reaper;
pub use server::{app, AppState};
pub use transition::TransitionService;
