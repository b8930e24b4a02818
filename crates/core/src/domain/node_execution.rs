//! Runtime instances of plan nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ambiance::Ambiance;
use crate::domain::interrupt::InterruptEffect;
use crate::domain::plan::{AdviserDecision, PlanNode, RepairAction};
use crate::domain::status::ExecutionStatus;

/// What the step asked the engine to do when it was facilitated. Persisted
/// so recovery and the abort path can tell how a node is executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutableResponse {
    /// Step completed within the engine call.
    Sync,
    /// Step waits for the given correlation ids.
    Async { correlation_ids: Vec<String> },
    /// Step was shipped to a remote worker.
    Task { task_id: String },
    /// Pass-through parent fanning out child executions.
    Children {
        children: Vec<Uuid>,
        max_concurrency: usize,
        proceed_if_failed: bool,
    },
}

impl ExecutableResponse {
    /// Modes that never have an outstanding remote task, so an abort can
    /// transition them locally.
    pub fn aborts_locally(&self) -> bool {
        !matches!(self, Self::Task { .. })
    }

    /// Task id to cancel on the remote worker, when there is one.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Task { task_id } => Some(task_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Configuration,
    Infrastructure,
    Business,
    Timeout,
    LostState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub category: FailureCategory,
    pub message: String,
}

impl FailureInfo {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Business, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Timeout, message)
    }
}

/// Armed when a node enters `InterventionWaiting`: the repair action the
/// monitor fires automatically if no operator acts before the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionDetails {
    pub repair: RepairAction,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: Uuid,
    pub ambiance: Ambiance,
    pub node: PlanNode,
    pub status: ExecutionStatus,
    pub parent_id: Option<Uuid>,
    /// Previous execution in this node's retry chain.
    pub previous_id: Option<Uuid>,
    pub retry_index: u32,
    pub executable_response: Option<ExecutableResponse>,
    pub adviser_decision: Option<AdviserDecision>,
    pub failure: Option<FailureInfo>,
    pub intervention: Option<InterventionDetails>,
    pub interrupt_history: Vec<InterruptEffect>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeExecution {
    pub fn new(uuid: Uuid, ambiance: Ambiance, node: PlanNode, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            ambiance,
            node,
            status: ExecutionStatus::Queued,
            parent_id,
            previous_id: None,
            retry_index: 0,
            executable_response: None,
            adviser_decision: None,
            failure: None,
            intervention: None,
            interrupt_history: Vec::new(),
            start_ts: None,
            end_ts: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fresh execution for a retry of this one: identity copy of the plan
    /// node, `previous_id` linking back, retry index advanced.
    pub fn retry_copy(&self) -> Self {
        let mut next = Self::new(
            Uuid::new_v4(),
            self.ambiance.clone(),
            self.node.identity_copy(),
            self.parent_id,
        );
        // The ambiance must address the new execution, not the finished one.
        if let Some(level) = next.ambiance.levels.last_mut() {
            level.runtime_id = next.uuid;
            level.setup_id = next.node.uuid;
        }
        next.previous_id = Some(self.uuid);
        next.retry_index = self.retry_index + 1;
        next
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ambiance::Level;
    use crate::domain::plan::FacilitatorMode;

    fn execution() -> NodeExecution {
        let node = PlanNode::new("deploy", "shell", FacilitatorMode::Sync);
        let uuid = Uuid::new_v4();
        let ambiance = Ambiance::new(Uuid::new_v4(), "acct", "org", "proj")
            .child(Level::new(node.uuid, uuid, "deploy"));
        NodeExecution::new(uuid, ambiance, node, None)
    }

    #[test]
    fn test_new_execution_is_queued() {
        let exec = execution();
        assert_eq!(exec.status, ExecutionStatus::Queued);
        assert!(exec.start_ts.is_none());
        assert_eq!(exec.ambiance.node_runtime_id().unwrap(), exec.uuid);
    }

    #[test]
    fn test_retry_copy_links_previous() {
        let exec = execution();
        let retry = exec.retry_copy();

        assert_ne!(retry.uuid, exec.uuid);
        assert_ne!(retry.node.uuid, exec.node.uuid);
        assert_eq!(retry.previous_id, Some(exec.uuid));
        assert_eq!(retry.retry_index, 1);
        assert_eq!(retry.node.identifier, exec.node.identifier);
        assert_eq!(retry.ambiance.node_runtime_id().unwrap(), retry.uuid);
    }

    #[test]
    fn test_aborts_locally_by_mode() {
        assert!(ExecutableResponse::Sync.aborts_locally());
        assert!(ExecutableResponse::Children {
            children: vec![],
            max_concurrency: 1,
            proceed_if_failed: false,
        }
        .aborts_locally());
        assert!(!ExecutableResponse::Task {
            task_id: "t-1".into()
        }
        .aborts_locally());
    }
}
