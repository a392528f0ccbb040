pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod run;
pub mod spawn;

pub use error::WorkerError;
pub use identity::WorkerIdentity;
pub use run::{run_task_instance, WorkerRuntimeConfig};
