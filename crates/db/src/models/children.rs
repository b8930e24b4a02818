use uuid::Uuid;
use windlass_core::{ConcurrentChildInstance, ExecutionStatus};

use crate::error::DbError;
use crate::models::node_execution::parse_uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChildInstanceRow {
    pub parent_node_execution_id: String,
    pub plan_execution_id: String,
    pub children: String,
    pub cursor: i64,
    pub child_statuses: String,
    pub max_concurrency: i64,
    pub proceed_if_failed: i64,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChildInstanceRow {
    pub fn into_domain(self) -> Result<(ConcurrentChildInstance, i64), DbError> {
        let children: Vec<String> = serde_json::from_str(&self.children)?;
        let children = children
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<Result<Vec<Uuid>, _>>()?;
        let statuses: Vec<String> = serde_json::from_str(&self.child_statuses)?;
        let child_statuses = statuses
            .iter()
            .map(|s| {
                ExecutionStatus::parse(s)
                    .ok_or_else(|| DbError::InvalidValue(format!("child status '{s}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let instance = ConcurrentChildInstance {
            parent_node_execution_id: parse_uuid(&self.parent_node_execution_id)?,
            plan_execution_id: parse_uuid(&self.plan_execution_id)?,
            children_node_execution_ids: children,
            cursor: self.cursor as usize,
            child_statuses,
            max_concurrency: self.max_concurrency as usize,
            proceed_if_failed: self.proceed_if_failed != 0,
        };
        Ok((instance, self.version))
    }
}

pub(crate) fn children_json(instance: &ConcurrentChildInstance) -> Result<String, DbError> {
    let ids: Vec<String> = instance
        .children_node_execution_ids
        .iter()
        .map(|id| id.to_string())
        .collect();
    Ok(serde_json::to_string(&ids)?)
}

pub(crate) fn statuses_json(statuses: &[ExecutionStatus]) -> Result<String, DbError> {
    let strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    Ok(serde_json::to_string(&strs)?)
}
