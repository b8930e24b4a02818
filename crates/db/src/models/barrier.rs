use windlass_core::{BarrierInstance, BarrierState};

use crate::error::DbError;
use crate::models::node_execution::parse_uuid;
use crate::models::{datetime_to_millis, millis_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BarrierRow {
    pub uuid: String,
    pub identifier: String,
    pub group_id: String,
    pub plan_execution_id: String,
    pub state: String,
    pub expires_at: i64,
    pub positions: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BarrierRow {
    pub fn into_domain(self) -> Result<BarrierInstance, DbError> {
        Ok(BarrierInstance {
            uuid: parse_uuid(&self.uuid)?,
            identifier: self.identifier,
            group_id: self.group_id,
            plan_execution_id: parse_uuid(&self.plan_execution_id)?,
            state: BarrierState::parse(&self.state)
                .ok_or_else(|| DbError::InvalidValue(format!("barrier state '{}'", self.state)))?,
            expires_at: millis_to_datetime(self.expires_at),
            positions: serde_json::from_str(&self.positions)?,
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.updated_at),
        })
    }
}

impl TryFrom<&BarrierInstance> for BarrierRow {
    type Error = DbError;

    fn try_from(barrier: &BarrierInstance) -> Result<Self, DbError> {
        Ok(Self {
            uuid: barrier.uuid.to_string(),
            identifier: barrier.identifier.clone(),
            group_id: barrier.group_id.clone(),
            plan_execution_id: barrier.plan_execution_id.to_string(),
            state: barrier.state.as_str().to_string(),
            expires_at: datetime_to_millis(barrier.expires_at),
            positions: serde_json::to_string(&barrier.positions)?,
            created_at: datetime_to_millis(barrier.created_at),
            updated_at: datetime_to_millis(barrier.updated_at),
        })
    }
}
