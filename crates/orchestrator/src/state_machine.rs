use windlass_core::ExecutionStatus;

use crate::error::{OrchestratorError, Result};

/// Allowed node-execution status transitions. Terminal statuses have no
/// outgoing edges; a retry is a new execution, not a reopened one.
pub struct ExecutionStateMachine;

impl ExecutionStateMachine {
    pub fn validate_transition(from: ExecutionStatus, to: ExecutionStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: ExecutionStatus) -> &'static [ExecutionStatus] {
        use ExecutionStatus::*;
        match from {
            Queued => &[Running, Skipped, Aborted, Suspended, Errored, Discontinuing],
            Running => &[
                Succeeded,
                Failed,
                Errored,
                Aborted,
                Expired,
                Suspended,
                Discontinuing,
                InterventionWaiting,
            ],
            InterventionWaiting => &[Running, Aborted, Succeeded, Failed, Skipped, Discontinuing],
            Discontinuing => &[Aborted, Errored, Expired],
            Succeeded | Failed | Errored | Aborted | Expired | Skipped | Suspended => &[],
        }
    }

    pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// Statuses an end-of-life transition may start from.
    pub fn finalizable_statuses() -> &'static [ExecutionStatus] {
        use ExecutionStatus::*;
        &[Queued, Running, InterventionWaiting, Discontinuing]
    }
}
