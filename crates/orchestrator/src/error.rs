use thiserror::Error;
use uuid::Uuid;
use windlass_core::ExecutionStatus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unknown step types are a configuration error, never retried.
    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    #[error("Node execution not found: {0}")]
    NodeExecutionNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Node execution {id} is not interruptible in status {status}")]
    NotInterruptible { id: Uuid, status: ExecutionStatus },

    #[error("Advisory lock timed out: {0}")]
    LockTimeout(String),

    #[error("Concurrent child instance missing for parent {0}")]
    MissingChildInstance(Uuid),

    #[error("Unknown condition operator: {0}")]
    UnknownConditionOperator(String),

    #[error("Barrier group not found: {0}")]
    BarrierNotFound(String),

    #[error("Task dispatch failed: {0}")]
    TaskDispatch(String),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Core error: {0}")]
    Core(#[from] windlass_core::CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Transient infrastructure errors are never surfaced as a pipeline
    /// status; the affected node is left for the reconciliation sweep.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout(_) | Self::Database(db::DbError::Sqlx(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OrchestratorError::LockTimeout("start::x".into()).is_transient());
        assert!(!OrchestratorError::UnknownStepType("bogus".into()).is_transient());
        assert!(!OrchestratorError::NotInterruptible {
            id: Uuid::new_v4(),
            status: ExecutionStatus::Succeeded,
        }
        .is_transient());
    }
}
