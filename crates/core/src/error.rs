use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Plan node not found: {0}")]
    PlanNodeNotFound(Uuid),

    #[error("Node execution not found: {0}")]
    NodeExecutionNotFound(Uuid),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Ambiance has no levels")]
    EmptyAmbiance,

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let error = CoreError::PlanNodeNotFound(id);
        assert!(error.to_string().contains(&id.to_string()));
    }
}
