use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Stored document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Node execution not found: {0}")]
    NodeExecutionNotFound(Uuid),

    #[error("Interrupt not found: {0}")]
    InterruptNotFound(Uuid),

    #[error("Duplicate document '{name}' in scope {scope}")]
    DuplicateDocument { name: String, scope: Uuid },

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

impl DbError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateDocument { .. })
    }
}
