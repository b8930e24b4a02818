//! Node-produced values.
//!
//! Sweeping outputs flow downward (consumable by descendants of the
//! producing scope); outcomes flow upward (consumable by ancestors, keyed
//! by the level that produced them). Both are stored as one generic
//! document carrying an opaque JSON payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ambiance::{Ambiance, Level};
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputInstance {
    pub uuid: Uuid,
    pub plan_execution_id: Uuid,
    /// Ambiance snapshot at write time.
    pub levels: Vec<Level>,
    pub name: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OutputInstance {
    pub fn new(
        ambiance: &Ambiance,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<Self, CoreError> {
        if ambiance.levels.is_empty() {
            return Err(CoreError::EmptyAmbiance);
        }
        Ok(Self {
            uuid: Uuid::new_v4(),
            plan_execution_id: ambiance.plan_execution_id,
            levels: ambiance.levels.clone(),
            name: name.into(),
            value,
            created_at: Utc::now(),
        })
    }

    /// Scope the output is published into: the producing node's own level,
    /// making it visible to that scope's descendants.
    pub fn scope_runtime_id(&self) -> Uuid {
        self.levels.last().map(|l| l.runtime_id).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeInstance {
    pub uuid: Uuid,
    pub plan_execution_id: Uuid,
    pub levels: Vec<Level>,
    pub produced_by_runtime_id: Uuid,
    pub name: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OutcomeInstance {
    pub fn new(
        ambiance: &Ambiance,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<Self, CoreError> {
        let produced_by_runtime_id = ambiance.node_runtime_id()?;
        Ok(Self {
            uuid: Uuid::new_v4(),
            plan_execution_id: ambiance.plan_execution_id,
            levels: ambiance.levels.clone(),
            produced_by_runtime_id,
            name: name.into(),
            value,
            created_at: Utc::now(),
        })
    }

    /// Outcomes are published into the enclosing scope so ancestors can
    /// read them; a root-level outcome scopes to the producer itself.
    pub fn scope_runtime_id(&self) -> Uuid {
        if self.levels.len() >= 2 {
            self.levels[self.levels.len() - 2].runtime_id
        } else {
            self.produced_by_runtime_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ambiance_with_levels() -> (Ambiance, Uuid, Uuid) {
        let stage_runtime = Uuid::new_v4();
        let step_runtime = Uuid::new_v4();
        let amb = Ambiance::new(Uuid::new_v4(), "acct", "org", "proj")
            .child(Level::new(Uuid::new_v4(), stage_runtime, "stage"))
            .child(Level::new(Uuid::new_v4(), step_runtime, "step"));
        (amb, stage_runtime, step_runtime)
    }

    #[test]
    fn test_output_scopes_to_own_level() {
        let (amb, _, step_runtime) = ambiance_with_levels();
        let output = OutputInstance::new(&amb, "artifact", serde_json::json!({"tag": "v1"}))
            .unwrap();
        assert_eq!(output.scope_runtime_id(), step_runtime);
    }

    #[test]
    fn test_outcome_scopes_to_parent_level() {
        let (amb, stage_runtime, step_runtime) = ambiance_with_levels();
        let outcome = OutcomeInstance::new(&amb, "result", serde_json::json!(42)).unwrap();
        assert_eq!(outcome.produced_by_runtime_id, step_runtime);
        assert_eq!(outcome.scope_runtime_id(), stage_runtime);
    }

    #[test]
    fn test_output_requires_levels() {
        let amb = Ambiance::new(Uuid::new_v4(), "acct", "org", "proj");
        assert!(OutputInstance::new(&amb, "x", serde_json::Value::Null).is_err());
    }
}
