//! WorkflowRun valid-transition table and its cascade into Workflow.status
//! (§4.2.1, §4.2.2), ported from `workflow_run.py`.

use jobmon_core::constants::{WorkflowRunStatus as R, WorkflowStatus as W};

pub const VALID: &[(R, R)] = &[
    (R::Registered, R::Linking),
    (R::Linking, R::Bound),
    (R::Linking, R::Aborted),
    (R::Bound, R::Instantiated),
    (R::Bound, R::Error),
    (R::Bound, R::ColdResume),
    (R::Bound, R::HotResume),
    (R::Instantiated, R::Launched),
    (R::Instantiated, R::Error),
    (R::Launched, R::Running),
    (R::Launched, R::Error),
    (R::Running, R::Done),
    (R::Running, R::Stopped),
    (R::Running, R::Error),
    (R::Running, R::ColdResume),
    (R::Running, R::HotResume),
    (R::ColdResume, R::Terminated),
    (R::HotResume, R::Terminated),
];

pub fn is_valid(from: R, to: R) -> bool {
    from == to || VALID.contains(&(from, to))
}

/// Workflow.status update cascaded from a workflow-run transition (§4.2.2).
/// Returns `None` when the workflow-run status doesn't drive the workflow
/// (e.g. `REGISTERED`, `LINKING`).
pub fn cascade_to_workflow(run_status: R) -> Option<W> {
    match run_status {
        R::Bound => Some(W::Queued),
        R::Running => Some(W::Running),
        R::Done => Some(W::Done),
        R::Terminated => Some(W::Halted),
        R::Error => Some(W::Failed),
        R::Aborted => Some(W::Aborted),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_cascades_to_halted() {
        assert_eq!(cascade_to_workflow(R::Terminated), Some(W::Halted));
    }

    #[test]
    fn registered_to_bound_rejected_directly() {
        assert!(!is_valid(R::Registered, R::Bound));
    }
}
