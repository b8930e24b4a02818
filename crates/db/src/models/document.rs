use windlass_core::{OutcomeInstance, OutputInstance};

use crate::error::DbError;
use crate::models::node_execution::parse_uuid;
use crate::models::{datetime_to_millis, millis_to_datetime};

/// Outputs and outcomes share one generic document entity; the kind tag
/// tells consumers how to interpret scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Output,
    Outcome,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Outcome => "outcome",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepDocumentRow {
    pub uuid: String,
    pub doc_kind: String,
    pub plan_execution_id: String,
    pub scope_runtime_id: String,
    pub produced_by_runtime_id: Option<String>,
    pub name: String,
    pub levels: String,
    pub value: String,
    pub created_at: i64,
}

impl StepDocumentRow {
    pub fn into_output(self) -> Result<OutputInstance, DbError> {
        Ok(OutputInstance {
            uuid: parse_uuid(&self.uuid)?,
            plan_execution_id: parse_uuid(&self.plan_execution_id)?,
            levels: serde_json::from_str(&self.levels)?,
            name: self.name,
            value: serde_json::from_str(&self.value)?,
            created_at: millis_to_datetime(self.created_at),
        })
    }

    pub fn into_outcome(self) -> Result<OutcomeInstance, DbError> {
        let produced_by = self
            .produced_by_runtime_id
            .as_deref()
            .ok_or_else(|| DbError::InvalidValue("outcome without producer".to_string()))?;
        Ok(OutcomeInstance {
            uuid: parse_uuid(&self.uuid)?,
            plan_execution_id: parse_uuid(&self.plan_execution_id)?,
            levels: serde_json::from_str(&self.levels)?,
            produced_by_runtime_id: parse_uuid(produced_by)?,
            name: self.name,
            value: serde_json::from_str(&self.value)?,
            created_at: millis_to_datetime(self.created_at),
        })
    }
}

impl TryFrom<&OutputInstance> for StepDocumentRow {
    type Error = DbError;

    fn try_from(output: &OutputInstance) -> Result<Self, DbError> {
        Ok(Self {
            uuid: output.uuid.to_string(),
            doc_kind: DocumentKind::Output.as_str().to_string(),
            plan_execution_id: output.plan_execution_id.to_string(),
            scope_runtime_id: output.scope_runtime_id().to_string(),
            produced_by_runtime_id: None,
            name: output.name.clone(),
            levels: serde_json::to_string(&output.levels)?,
            value: serde_json::to_string(&output.value)?,
            created_at: datetime_to_millis(output.created_at),
        })
    }
}

impl TryFrom<&OutcomeInstance> for StepDocumentRow {
    type Error = DbError;

    fn try_from(outcome: &OutcomeInstance) -> Result<Self, DbError> {
        Ok(Self {
            uuid: outcome.uuid.to_string(),
            doc_kind: DocumentKind::Outcome.as_str().to_string(),
            plan_execution_id: outcome.plan_execution_id.to_string(),
            scope_runtime_id: outcome.scope_runtime_id().to_string(),
            produced_by_runtime_id: Some(outcome.produced_by_runtime_id.to_string()),
            name: outcome.name.clone(),
            levels: serde_json::to_string(&outcome.levels)?,
            value: serde_json::to_string(&outcome.value)?,
            created_at: datetime_to_millis(outcome.created_at),
        })
    }
}
