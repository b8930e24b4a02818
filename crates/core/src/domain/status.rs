use serde::{Deserialize, Serialize};

/// Lifecycle status of a node execution.
///
/// `Queued` and `Running` are the only resumable states;
/// `InterventionWaiting` is reversible (an interrupt or its timeout decides
/// where it goes); everything else is terminal for that execution. A retry
/// never reopens a terminal execution, it spawns a new one linked through
/// `previous_id`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Queued,
    Running,
    InterventionWaiting,
    Discontinuing,
    Succeeded,
    Failed,
    Errored,
    Aborted,
    Expired,
    Skipped,
    Suspended,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::InterventionWaiting => "intervention_waiting",
            Self::Discontinuing => "discontinuing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
            Self::Skipped => "skipped",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "intervention_waiting" => Some(Self::InterventionWaiting),
            "discontinuing" => Some(Self::Discontinuing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "errored" => Some(Self::Errored),
            "aborted" => Some(Self::Aborted),
            "expired" => Some(Self::Expired),
            "skipped" => Some(Self::Skipped),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Errored
                | Self::Aborted
                | Self::Expired
                | Self::Skipped
                | Self::Suspended
        )
    }

    /// Statuses counted as failures when aggregating siblings or deciding
    /// fail-fast for a strategy fan-out.
    pub fn is_broken(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Errored | Self::Aborted | Self::Expired
        )
    }

    /// Statuses an interrupt may still act upon.
    pub fn is_discontinuable(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Running | Self::InterventionWaiting | Self::Discontinuing
        )
    }

    pub fn all_non_terminal() -> &'static [ExecutionStatus] {
        &[
            Self::Queued,
            Self::Running,
            Self::InterventionWaiting,
            Self::Discontinuing,
        ]
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for status in [
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::InterventionWaiting,
            ExecutionStatus::Discontinuing,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Errored,
            ExecutionStatus::Aborted,
            ExecutionStatus::Expired,
            ExecutionStatus::Skipped,
            ExecutionStatus::Suspended,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::InterventionWaiting.is_terminal());
        assert!(!ExecutionStatus::Discontinuing.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Skipped.is_terminal());
        assert!(ExecutionStatus::Suspended.is_terminal());
    }

    #[test]
    fn test_broken_statuses() {
        assert!(ExecutionStatus::Failed.is_broken());
        assert!(ExecutionStatus::Aborted.is_broken());
        assert!(ExecutionStatus::Expired.is_broken());
        assert!(!ExecutionStatus::Succeeded.is_broken());
        assert!(!ExecutionStatus::Skipped.is_broken());
    }

    #[test]
    fn test_discontinuable() {
        assert!(ExecutionStatus::Running.is_discontinuable());
        assert!(ExecutionStatus::InterventionWaiting.is_discontinuable());
        assert!(!ExecutionStatus::Succeeded.is_discontinuable());
    }
}
