//! Task valid-transition table (§4.2.1). Task has no documented untimely set
//! in spec.md — every non-listed edge is rejected outright.

use jobmon_core::constants::TaskStatus as S;

pub const VALID: &[(S, S)] = &[
    (S::Registering, S::Queued),
    (S::Queued, S::Instantiating),
    (S::Instantiating, S::Launched),
    (S::Instantiating, S::ErrorRecoverable),
    (S::Launched, S::Running),
    (S::Launched, S::ErrorRecoverable),
    (S::Launched, S::ErrorFatal),
    (S::Running, S::Done),
    (S::Running, S::ErrorRecoverable),
    (S::Running, S::ErrorFatal),
    (S::ErrorRecoverable, S::AdjustingResources),
    (S::ErrorRecoverable, S::ErrorFatal),
    (S::AdjustingResources, S::Queued),
];

pub fn is_valid(from: S, to: S) -> bool {
    from == to || VALID.contains(&(from, to))
}

/// Where a task instance's terminal error routes the owning task (§4.2.2):
/// `ADJUSTING_RESOURCES` if attempts remain, else `ERROR_FATAL`.
pub fn transition_after_task_instance_error(num_attempts: i32, max_attempts: i32) -> S {
    if num_attempts >= max_attempts {
        S::ErrorFatal
    } else {
        S::ErrorRecoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_exhausted_routes_to_fatal() {
        assert_eq!(transition_after_task_instance_error(3, 3), S::ErrorFatal);
    }

    #[test]
    fn attempts_remaining_routes_to_recoverable() {
        assert_eq!(transition_after_task_instance_error(1, 3), S::ErrorRecoverable);
    }

    #[test]
    fn done_to_queued_rejected() {
        assert!(!is_valid(S::Done, S::Queued));
    }
}
