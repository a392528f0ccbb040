//! §4.3 step 1: resolve which task instance this worker process is. A
//! single task is handed its instance id directly; an array task only knows
//! its own step within a batch and must ask the server to resolve it.

use jobmon_core::client::Requester;
use jobmon_core::wire::TaskInstanceInfoResponse;

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub enum WorkerIdentity {
    Single { task_instance_id: i64 },
    ArrayStep {
        array_id: i64,
        array_batch_num: i32,
        array_step_id: i32,
    },
}

impl WorkerIdentity {
    /// Built from the environment the distributor set up for this worker
    /// process (`JOBMON_TASK_INSTANCE_ID` for a single task, or
    /// `JOBMON_ARRAY_ID`/`JOBMON_ARRAY_BATCH_NUM` + the plugin-reported
    /// `ARRAY_STEP_ID` for an array task).
    pub fn from_env(array_step_id: Option<i32>) -> Option<Self> {
        if let Ok(id) = std::env::var("JOBMON_TASK_INSTANCE_ID") {
            return id.parse().ok().map(|task_instance_id| Self::Single { task_instance_id });
        }
        let array_id = std::env::var("JOBMON_ARRAY_ID").ok()?.parse().ok()?;
        let array_batch_num = std::env::var("JOBMON_ARRAY_BATCH_NUM").ok()?.parse().ok()?;
        let array_step_id = array_step_id?;
        Some(Self::ArrayStep {
            array_id,
            array_batch_num,
            array_step_id,
        })
    }

    pub async fn resolve(
        &self,
        requester: &Requester,
    ) -> Result<TaskInstanceInfoResponse, WorkerError> {
        match self {
            Self::Single { task_instance_id } => {
                let route = format!("/task_instance/{task_instance_id}");
                Ok(requester.get(&route).await?)
            }
            Self::ArrayStep {
                array_id,
                array_batch_num,
                array_step_id,
            } => {
                let route =
                    format!("/array/{array_id}/batch/{array_batch_num}/step/{array_step_id}");
                Ok(requester.get(&route).await?)
            }
        }
    }
}
