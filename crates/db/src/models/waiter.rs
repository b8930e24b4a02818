use crate::error::DbError;

/// Lifecycle of a registered wait-notify callback. Claiming a waiter for
/// delivery is a `Waiting -> Processing` conditional update, which is what
/// makes delivery exactly-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    Waiting,
    Processing,
    Done,
    TimedOut,
}

impl WaiterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(DbError::InvalidValue(format!("waiter state '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WaiterRow {
    pub uuid: String,
    pub correlation_ids: String,
    pub callback: String,
    pub state: String,
    pub deadline: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WaiterRow {
    pub fn correlation_ids(&self) -> Result<Vec<String>, DbError> {
        Ok(serde_json::from_str(&self.correlation_ids)?)
    }
}
