//! Status vocabularies shared by every component that talks to the state
//! service. Kept in one place so the wire format (`serde` tag) and the FSM
//! tables in `jobmon-state` agree on spelling.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! status_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => stringify!($variant)),+
                };
                write!(f, "{s}")
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

status_enum!(WorkflowStatus {
    Registering,
    Queued,
    Instantiating,
    Launched,
    Running,
    Done,
    Halted,
    Failed,
    Aborted,
});

status_enum!(WorkflowRunStatus {
    Registered,
    Linking,
    Bound,
    Instantiated,
    Launched,
    Running,
    ColdResume,
    HotResume,
    Terminated,
    Stopped,
    Error,
    Done,
    Aborted,
});

status_enum!(TaskStatus {
    Registering,
    Queued,
    Instantiating,
    Launched,
    Running,
    Done,
    AdjustingResources,
    ErrorRecoverable,
    ErrorFatal,
});

status_enum!(TaskInstanceStatus {
    Queued,
    Instantiated,
    NoDistributorId,
    Launched,
    Running,
    Triaging,
    KillSelf,
    Done,
    Error,
    ErrorFatal,
    UnknownError,
    ResourceError,
    NoHeartbeat,
});

impl TaskInstanceStatus {
    /// Terminal-error states per spec.md §4.2.7 / the `error_states` list in
    /// `task_instance.py`.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::NoDistributorId
                | Self::Error
                | Self::UnknownError
                | Self::ResourceError
                | Self::KillSelf
                | Self::ErrorFatal
                | Self::NoHeartbeat
        )
    }

    pub fn is_terminal(self) -> bool {
        self.is_error() || matches!(self, Self::Done)
    }

    /// Statuses that count against workflow/array concurrency caps (§3, §4.5.3).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Instantiated | Self::Launched | Self::Running
        )
    }
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::ErrorFatal)
    }
}

impl WorkflowRunStatus {
    /// At most one workflow run per workflow may be in one of these at a time (§3).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Bound | Self::Running)
    }

    /// Statuses where the workflow run should still be heartbeating (`is_alive` in
    /// `workflow_run.py`).
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            Self::Linking | Self::Bound | Self::Running | Self::ColdResume | Self::HotResume
        )
    }
}

/// The taxonomy a cluster plugin maps an observed exit into (§4.2.7, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatusKind {
    Done,
    Error,
    ResourceError,
    UnknownError,
}

impl ExitStatusKind {
    pub fn to_task_instance_status(self) -> TaskInstanceStatus {
        match self {
            Self::Done => TaskInstanceStatus::Done,
            Self::Error => TaskInstanceStatus::Error,
            Self::ResourceError => TaskInstanceStatus::ResourceError,
            Self::UnknownError => TaskInstanceStatus::UnknownError,
        }
    }
}

/// Which stream a worker-side log file path is being resolved for (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Stdout,
    Stderr,
}

/// Stderr captured by the worker runtime is truncated to this many trailing
/// bytes before being stored on the server (§4.3, §8).
pub const STDERR_TAIL_BYTES: usize = 10_000;

/// Cap on the multiprocess plugin's exit-info cache (§9).
pub const EXIT_INFO_CACHE_SIZE: usize = 1000;

/// Maximum tasks per scheduler batch (§4.5.3).
pub const MAX_BATCH_SIZE: usize = 500;

/// Page size used by `build_from_workflow_id`'s `get_tasks` paging (§4.5.2).
pub const GET_TASKS_CHUNK_SIZE: usize = 500;
