//! The cluster plugin boundary (C1, §4.1): the only place jobmon talks to a
//! specific execution backend. Grounded on the trait split implied by
//! `jobmon_core/cluster.py` and the `multiproc_distributor.py` /
//! `multiproc_worker_node.py` pair — one trait submits and polls from the
//! distributor side, the other resolves a worker's own identity once it is
//! already running inside the backend.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::constants::ExitStatusKind;
use crate::error::PluginError;

pub mod multiprocess;
pub mod sequential;

/// A task instance queued for submission, as handed to a distributor plugin.
#[derive(Debug, Clone)]
pub struct SubmissionSpec {
    pub task_instance_id: i64,
    pub name: String,
    pub command: String,
    pub requested_resources: serde_json::Value,
    pub array_id: Option<i64>,
    pub array_batch_num: Option<i32>,
    pub array_step_id: Option<i32>,
}

/// What a plugin reports after polling a finished remote job.
#[derive(Debug, Clone)]
pub struct RemoteExitInfo {
    pub kind: ExitStatusKind,
    pub error_message: Option<String>,
}

/// Implemented once per execution backend (multiprocess, sequential, a real
/// scheduler's `qsub`/`sbatch`-equivalent). Driven by `jobmon-distributor`
/// (§4.4).
#[async_trait]
pub trait DistributorPlugin: Send + Sync {
    fn cluster_name(&self) -> &str;

    /// Submit one task instance, returning the backend-assigned id that gets
    /// stored as `distributor_id` (§4.4 step 2).
    async fn submit(&self, spec: &SubmissionSpec) -> Result<String, PluginError>;

    /// Submit every task instance in an array batch at once, returning a
    /// distributor id per `task_instance_id`. The default implementation
    /// submits one at a time; backends with native array support (a real
    /// scheduler's job-array submission) should override this.
    async fn submit_array_batch(
        &self,
        specs: &[SubmissionSpec],
    ) -> Result<HashMap<i64, String>, PluginError> {
        let mut out = HashMap::with_capacity(specs.len());
        for spec in specs {
            let id = self.submit(spec).await?;
            out.insert(spec.task_instance_id, id);
        }
        Ok(out)
    }

    /// Poll the backend for task instances that have exited since the last
    /// call. Used by the distributor's reconcile loop (§4.4 step 5).
    async fn poll_exit_info(
        &self,
        distributor_ids: &[String],
    ) -> Result<HashMap<String, RemoteExitInfo>, PluginError>;

    /// Whether the backend still considers `distributor_id` to be running,
    /// for task instances that never reported an exit (wedged/killed jobs).
    async fn is_alive(&self, distributor_id: &str) -> Result<bool, PluginError>;

    /// Ask the backend to terminate a still-running job (§4.5.4 resume/hot-resume).
    async fn terminate(&self, distributor_id: &str) -> Result<(), PluginError>;
}

/// Resource usage sampled from the finished child process (§4.1).
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub maxrss_bytes: Option<i64>,
    pub user_time_sec: Option<f64>,
    pub system_time_sec: Option<f64>,
}

/// Which stream a log path is being resolved for (§4.1 `LogfilePath`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Implemented by the worker runtime's view into its own execution backend
/// (§4.1, §4.3): how does a worker process find out which task instance it
/// is, once the backend has already started it, and how does it map its own
/// child's outcome into jobmon's taxonomy?
pub trait WorkerNodePlugin: Send + Sync {
    /// This worker's own distributor-assigned id, read from the backend's
    /// environment (e.g. `JOB_ID`/`ARRAY_STEP_ID` for multiprocess).
    fn distributor_id(&self) -> String;

    /// For array tasks: which step of the batch this worker process is.
    fn array_step_id(&self) -> Option<i32>;

    /// Map a finished child's exit code/signal into jobmon's exit taxonomy
    /// (§4.2.7). `err` carries a spawn-level failure the process itself
    /// never got to report (e.g. the shell couldn't exec the command).
    fn exit_info(&self, exit_code: Option<i32>, err: Option<&str>) -> (ExitStatusKind, Option<String>) {
        match (exit_code, err) {
            (_, Some(message)) => (ExitStatusKind::UnknownError, Some(message.to_string())),
            (Some(0), None) => (ExitStatusKind::Done, None),
            (Some(code), None) => (ExitStatusKind::Error, Some(format!("exited with code {code}"))),
            (None, None) => (ExitStatusKind::UnknownError, Some("process terminated by signal".to_string())),
        }
    }

    /// Best-effort resource usage for the just-finished child. Reference
    /// plugins that can't sample rusage return all-`None`.
    fn usage_stats(&self) -> UsageStats {
        UsageStats::default()
    }

    /// Where this worker should write a given stream's log file (§4.1).
    fn logfile_path(&self, kind: LogStream, dir: &std::path::Path, name: &str) -> std::path::PathBuf {
        let suffix = match kind {
            LogStream::Stdout => "out",
            LogStream::Stderr => "err",
        };
        dir.join(format!("{name}.{suffix}"))
    }
}
