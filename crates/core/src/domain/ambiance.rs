//! Execution coordinates.
//!
//! An [`Ambiance`] addresses one node execution inside one plan execution:
//! tenant metadata plus an ordered stack of [`Level`]s
//! (pipeline → stage → step group → step → strategy iteration). Ambiances
//! are immutable; entering a child scope appends a level to a clone.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Strategy iteration coordinates carried by matrix/loop levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyMetadata {
    pub current_iteration: usize,
    pub total_iterations: usize,
}

/// One entry in the ambiance stack.
///
/// `setup_id` points at the static plan node, `runtime_id` at the node
/// execution instantiated from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub setup_id: Uuid,
    pub runtime_id: Uuid,
    pub identifier: String,
    pub group: Option<String>,
    pub strategy_metadata: Option<StrategyMetadata>,
}

impl Level {
    pub fn new(setup_id: Uuid, runtime_id: Uuid, identifier: impl Into<String>) -> Self {
        Self {
            setup_id,
            runtime_id,
            identifier: identifier.into(),
            group: None,
            strategy_metadata: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_strategy(mut self, metadata: StrategyMetadata) -> Self {
        self.strategy_metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: Uuid,
    pub account_id: String,
    pub org_id: String,
    pub project_id: String,
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(
        plan_execution_id: Uuid,
        account_id: impl Into<String>,
        org_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            plan_execution_id,
            account_id: account_id.into(),
            org_id: org_id.into(),
            project_id: project_id.into(),
            levels: Vec::new(),
        }
    }

    /// Returns a new ambiance with `level` appended. The receiver is left
    /// untouched.
    pub fn child(&self, level: Level) -> Self {
        let mut next = self.clone();
        next.levels.push(level);
        next
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Runtime id of the node execution this ambiance addresses.
    pub fn node_runtime_id(&self) -> Result<Uuid, CoreError> {
        self.current_level()
            .map(|l| l.runtime_id)
            .ok_or(CoreError::EmptyAmbiance)
    }

    /// Runtime id of the nearest enclosing scope, if any.
    pub fn parent_runtime_id(&self) -> Option<Uuid> {
        if self.levels.len() < 2 {
            return None;
        }
        self.levels.get(self.levels.len() - 2).map(|l| l.runtime_id)
    }

    /// Two executions are siblings when their ambiances share every level
    /// but the last.
    pub fn is_sibling_of(&self, other: &Ambiance) -> bool {
        if self.plan_execution_id != other.plan_execution_id {
            return false;
        }
        let n = self.levels.len();
        n == other.levels.len() && n > 0 && self.levels[..n - 1] == other.levels[..n - 1]
    }

    /// Runtime ids from the innermost level outward, used when resolving
    /// scoped outputs.
    pub fn scope_runtime_ids(&self) -> Vec<Uuid> {
        self.levels.iter().rev().map(|l| l.runtime_id).collect()
    }
}
