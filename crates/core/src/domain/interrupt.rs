//! Operator- and system-issued interrupts.
//!
//! Interrupts are append-only facts. Applying one never rewrites history:
//! it appends an [`InterruptEffect`] to the target node execution and moves
//! the interrupt itself through its own small state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptType {
    Abort,
    AbortAll,
    PauseAll,
    ResumeAll,
    Retry,
    Ignore,
    MarkSuccess,
    MarkFailed,
    CustomFailure,
}

impl InterruptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::AbortAll => "abort_all",
            Self::PauseAll => "pause_all",
            Self::ResumeAll => "resume_all",
            Self::Retry => "retry",
            Self::Ignore => "ignore",
            Self::MarkSuccess => "mark_success",
            Self::MarkFailed => "mark_failed",
            Self::CustomFailure => "custom_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "abort" => Some(Self::Abort),
            "abort_all" => Some(Self::AbortAll),
            "pause_all" => Some(Self::PauseAll),
            "resume_all" => Some(Self::ResumeAll),
            "retry" => Some(Self::Retry),
            "ignore" => Some(Self::Ignore),
            "mark_success" => Some(Self::MarkSuccess),
            "mark_failed" => Some(Self::MarkFailed),
            "custom_failure" => Some(Self::CustomFailure),
            _ => None,
        }
    }

    /// Plan-wide interrupts carry no target node execution.
    pub fn is_plan_wide(&self) -> bool {
        matches!(self, Self::AbortAll | Self::PauseAll | Self::ResumeAll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterruptState {
    #[default]
    Registered,
    Processing,
    ProcessedSuccessfully,
    ProcessedUnsuccessfully,
}

impl InterruptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Processing => "processing",
            Self::ProcessedSuccessfully => "processed_successfully",
            Self::ProcessedUnsuccessfully => "processed_unsuccessfully",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(Self::Registered),
            "processing" => Some(Self::Processing),
            "processed_successfully" => Some(Self::ProcessedSuccessfully),
            "processed_unsuccessfully" => Some(Self::ProcessedUnsuccessfully),
            _ => None,
        }
    }
}

/// Who issued the interrupt and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptConfig {
    pub issued_by: String,
    pub reason: Option<String>,
}

impl InterruptConfig {
    pub fn operator(issued_by: impl Into<String>) -> Self {
        Self {
            issued_by: issued_by.into(),
            reason: None,
        }
    }

    pub fn system(reason: impl Into<String>) -> Self {
        Self {
            issued_by: "system".to_string(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub uuid: Uuid,
    pub interrupt_type: InterruptType,
    pub node_execution_id: Option<Uuid>,
    pub plan_execution_id: Uuid,
    pub state: InterruptState,
    pub config: InterruptConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interrupt {
    pub fn new(
        interrupt_type: InterruptType,
        plan_execution_id: Uuid,
        node_execution_id: Option<Uuid>,
        config: InterruptConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            interrupt_type,
            node_execution_id,
            plan_execution_id,
            state: InterruptState::Registered,
            config,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Appended to a node execution when an interrupt takes effect on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub interrupt_id: Uuid,
    pub interrupt_type: InterruptType,
    pub took_effect_at: DateTime<Utc>,
}

impl InterruptEffect {
    pub fn new(interrupt: &Interrupt) -> Self {
        Self {
            interrupt_id: interrupt.uuid,
            interrupt_type: interrupt.interrupt_type,
            took_effect_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        for ty in [
            InterruptType::Abort,
            InterruptType::AbortAll,
            InterruptType::PauseAll,
            InterruptType::ResumeAll,
            InterruptType::Retry,
            InterruptType::Ignore,
            InterruptType::MarkSuccess,
            InterruptType::MarkFailed,
            InterruptType::CustomFailure,
        ] {
            assert_eq!(InterruptType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn test_plan_wide_types() {
        assert!(InterruptType::AbortAll.is_plan_wide());
        assert!(InterruptType::PauseAll.is_plan_wide());
        assert!(!InterruptType::Abort.is_plan_wide());
        assert!(!InterruptType::MarkSuccess.is_plan_wide());
    }

    #[test]
    fn test_new_interrupt_registered() {
        let interrupt = Interrupt::new(
            InterruptType::Abort,
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            InterruptConfig::operator("alice"),
        );
        assert_eq!(interrupt.state, InterruptState::Registered);

        let effect = InterruptEffect::new(&interrupt);
        assert_eq!(effect.interrupt_id, interrupt.uuid);
        assert_eq!(effect.interrupt_type, InterruptType::Abort);
    }
}
