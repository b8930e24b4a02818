use uuid::Uuid;
use windlass_core::{ExecutionStatus, NodeExecution};

use crate::error::DbError;
use crate::models::{datetime_to_millis, millis_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeExecutionRow {
    pub uuid: String,
    pub plan_execution_id: String,
    pub parent_id: Option<String>,
    pub previous_id: Option<String>,
    pub retry_index: i64,
    pub status: String,
    pub ambiance: String,
    pub node: String,
    pub executable_response: Option<String>,
    pub adviser_decision: Option<String>,
    pub failure: Option<String>,
    pub intervention: Option<String>,
    pub interrupt_history: String,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NodeExecutionRow {
    pub fn into_domain(self) -> Result<NodeExecution, DbError> {
        let uuid = parse_uuid(&self.uuid)?;
        Ok(NodeExecution {
            uuid,
            ambiance: serde_json::from_str(&self.ambiance)?,
            node: serde_json::from_str(&self.node)?,
            status: ExecutionStatus::parse(&self.status)
                .ok_or_else(|| DbError::InvalidValue(format!("status '{}'", self.status)))?,
            parent_id: self.parent_id.as_deref().map(parse_uuid).transpose()?,
            previous_id: self.previous_id.as_deref().map(parse_uuid).transpose()?,
            retry_index: self.retry_index as u32,
            executable_response: self
                .executable_response
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            adviser_decision: self
                .adviser_decision
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            failure: self
                .failure
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            intervention: self
                .intervention
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            interrupt_history: serde_json::from_str(&self.interrupt_history)?,
            start_ts: self.start_ts.map(millis_to_datetime),
            end_ts: self.end_ts.map(millis_to_datetime),
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.updated_at),
        })
    }
}

impl TryFrom<&NodeExecution> for NodeExecutionRow {
    type Error = DbError;

    fn try_from(exec: &NodeExecution) -> Result<Self, DbError> {
        Ok(Self {
            uuid: exec.uuid.to_string(),
            plan_execution_id: exec.ambiance.plan_execution_id.to_string(),
            parent_id: exec.parent_id.map(|id| id.to_string()),
            previous_id: exec.previous_id.map(|id| id.to_string()),
            retry_index: exec.retry_index as i64,
            status: exec.status.as_str().to_string(),
            ambiance: serde_json::to_string(&exec.ambiance)?,
            node: serde_json::to_string(&exec.node)?,
            executable_response: exec
                .executable_response
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            adviser_decision: exec
                .adviser_decision
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            failure: exec.failure.as_ref().map(serde_json::to_string).transpose()?,
            intervention: exec
                .intervention
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            interrupt_history: serde_json::to_string(&exec.interrupt_history)?,
            start_ts: exec.start_ts.map(datetime_to_millis),
            end_ts: exec.end_ts.map(datetime_to_millis),
            created_at: datetime_to_millis(exec.created_at),
            updated_at: datetime_to_millis(exec.updated_at),
        })
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(s).map_err(|_| DbError::InvalidValue(format!("uuid '{s}'")))
}
