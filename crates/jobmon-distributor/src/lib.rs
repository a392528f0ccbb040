pub mod error;
pub mod heartbeat;
pub mod pump;
pub mod reconcile;
pub mod run;

pub use error::DistributorError;
pub use run::{run_forever, DistributorRuntimeConfig};
