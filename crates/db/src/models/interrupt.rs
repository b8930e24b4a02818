use windlass_core::{Interrupt, InterruptConfig, InterruptState, InterruptType};

use crate::error::DbError;
use crate::models::node_execution::parse_uuid;
use crate::models::{datetime_to_millis, millis_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InterruptRow {
    pub uuid: String,
    pub interrupt_type: String,
    pub node_execution_id: Option<String>,
    pub plan_execution_id: String,
    pub state: String,
    pub issued_by: String,
    pub reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl InterruptRow {
    pub fn into_domain(self) -> Result<Interrupt, DbError> {
        Ok(Interrupt {
            uuid: parse_uuid(&self.uuid)?,
            interrupt_type: InterruptType::parse(&self.interrupt_type).ok_or_else(|| {
                DbError::InvalidValue(format!("interrupt type '{}'", self.interrupt_type))
            })?,
            node_execution_id: self
                .node_execution_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            plan_execution_id: parse_uuid(&self.plan_execution_id)?,
            state: InterruptState::parse(&self.state)
                .ok_or_else(|| DbError::InvalidValue(format!("interrupt state '{}'", self.state)))?,
            config: InterruptConfig {
                issued_by: self.issued_by,
                reason: self.reason,
            },
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.updated_at),
        })
    }
}

impl From<&Interrupt> for InterruptRow {
    fn from(interrupt: &Interrupt) -> Self {
        Self {
            uuid: interrupt.uuid.to_string(),
            interrupt_type: interrupt.interrupt_type.as_str().to_string(),
            node_execution_id: interrupt.node_execution_id.map(|id| id.to_string()),
            plan_execution_id: interrupt.plan_execution_id.to_string(),
            state: interrupt.state.as_str().to_string(),
            issued_by: interrupt.config.issued_by.clone(),
            reason: interrupt.config.reason.clone(),
            created_at: datetime_to_millis(interrupt.created_at),
            updated_at: datetime_to_millis(interrupt.updated_at),
        }
    }
}
