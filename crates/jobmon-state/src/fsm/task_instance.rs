//! TaskInstance valid/untimely transition tables (§4.2.1), ported from the
//! `valid_transitions` / `untimely_transitions` class attributes of
//! `task_instance.py`.

use jobmon_core::constants::TaskInstanceStatus as S;

/// `(from, to)` edges that are rejected as `InvalidStateTransition` if
/// requested and not found here or in [`UNTIMELY`].
pub const VALID: &[(S, S)] = &[
    (S::Queued, S::Instantiated),
    (S::Queued, S::KillSelf),
    (S::Instantiated, S::Launched),
    (S::Instantiated, S::NoDistributorId),
    (S::Instantiated, S::KillSelf),
    (S::Instantiated, S::Running),
    (S::Launched, S::Running),
    (S::Launched, S::UnknownError),
    (S::Launched, S::ResourceError),
    (S::Launched, S::KillSelf),
    (S::Launched, S::ErrorFatal),
    (S::Running, S::Triaging),
    (S::Running, S::Error),
    (S::Running, S::UnknownError),
    (S::Running, S::ResourceError),
    (S::Running, S::KillSelf),
    (S::Running, S::Done),
    (S::Triaging, S::Running),
    (S::Triaging, S::ResourceError),
    (S::Triaging, S::UnknownError),
    (S::Triaging, S::ErrorFatal),
    (S::KillSelf, S::ErrorFatal),
];

/// Edges that arise from worker/reaper races. Requests along these edges are
/// logged and silently dropped rather than rejected (§3 invariant list,
/// §4.2.1).
pub const UNTIMELY: &[(S, S)] = &[
    (S::Running, S::Launched),
    (S::Error, S::Launched),
    (S::Error, S::UnknownError),
    (S::UnknownError, S::Error),
    (S::Done, S::UnknownError),
    (S::UnknownError, S::Done),
    (S::KillSelf, S::Done),
    (S::ResourceError, S::UnknownError),
    (S::UnknownError, S::ResourceError),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Valid,
    Untimely,
    Invalid,
}

pub fn classify(from: S, to: S) -> EdgeKind {
    if from == to {
        return EdgeKind::Untimely;
    }
    if VALID.contains(&(from, to)) {
        EdgeKind::Valid
    } else if UNTIMELY.contains(&(from, to)) {
        EdgeKind::Untimely
    } else {
        EdgeKind::Invalid
    }
}

/// Terminal-error states that `transition_after_task_instance_error` routes
/// through when cascading to the owning task (§4.2.2, §4.2.7).
pub fn is_error_terminal(status: S) -> bool {
    status.is_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_to_instantiated_is_valid() {
        assert_eq!(classify(S::Queued, S::Instantiated), EdgeKind::Valid);
    }

    #[test]
    fn late_done_after_unknown_error_is_untimely_not_rejected() {
        assert_eq!(classify(S::UnknownError, S::Done), EdgeKind::Untimely);
    }

    #[test]
    fn queued_to_done_is_invalid() {
        assert_eq!(classify(S::Queued, S::Done), EdgeKind::Invalid);
    }
}
