//! Swarm orchestrator (C5, §4.5): drives a bound workflow run's DAG forward
//! against the state service, enforcing workflow- and array-level
//! concurrency caps.

pub mod builder;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod resource_scale;
pub mod scheduler;
pub mod state;
pub mod swarm_task;

pub use builder::{build_from_workflow, build_from_workflow_id, TaskBlueprint, WorkflowBlueprint};
pub use error::SwarmError;
pub use gateway::ServerGateway;
pub use orchestrator::{run, OrchestratorConfig, OrchestratorResult};
pub use scheduler::Scheduler;
pub use state::{ArrayInfo, StateUpdate, SwarmState};
pub use swarm_task::SwarmTask;
