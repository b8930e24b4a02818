//! Static plan definitions.
//!
//! A [`Plan`] is the immutable graph a plan execution runs against. Each
//! [`PlanNode`] names a step type (resolved against the step registry at
//! run time), the facilitation mode it executes under, and the ordered
//! adviser list consulted when it finishes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::status::ExecutionStatus;
use crate::error::CoreError;

/// How a step is executed once facilitation resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilitatorMode {
    /// Completes inside the engine call.
    Sync,
    /// Completes later through correlator publishes.
    Async,
    /// Dispatched to a remote worker; the worker publishes the task id.
    Task,
    /// Pass-through parent that fans out child node executions.
    Children,
}

/// Automatic action taken when an intervention deadline expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    MarkAsSuccess,
    Retry,
    Ignore,
    OnFail,
    StageRollback,
    StepGroupRollback,
    EndExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given retry index, capped at ten
    /// doublings to keep the delay finite.
    pub fn delay_ms(&self, retry_index: u32) -> u64 {
        let exp = retry_index.min(10);
        self.backoff_base_ms.saturating_mul(1u64 << exp)
    }
}

/// What an adviser tells the engine to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdviserKind {
    /// Accept the status and notify the parent.
    NextStep,
    /// Re-run the node as a fresh execution, bounded by the policy.
    Retry { policy: RetryPolicy },
    /// Park the node for an operator, with an automatic repair action
    /// should the deadline pass unattended.
    Intervene {
        repair: RepairAction,
        timeout_ms: i64,
    },
    /// Conclude the whole plan execution.
    EndPlan,
}

/// One entry of a node's adviser chain. The first spec whose
/// `applies_to` contains the finishing status wins; declaration order is
/// the only precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviserSpec {
    pub kind: AdviserKind,
    pub applies_to: Vec<ExecutionStatus>,
}

impl AdviserSpec {
    pub fn new(kind: AdviserKind, applies_to: Vec<ExecutionStatus>) -> Self {
        Self { kind, applies_to }
    }

    pub fn matches(&self, status: ExecutionStatus) -> bool {
        self.applies_to.contains(&status)
    }
}

/// Decision produced by running the adviser chain, persisted on the node
/// execution for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviserDecision {
    pub kind: AdviserKind,
    pub status: ExecutionStatus,
}

/// Declarative skip condition evaluated before a node runs. Operators are
/// resolved against the engine's immutable condition registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCondition {
    pub operator: String,
    pub args: Vec<String>,
}

impl SkipCondition {
    pub fn new(operator: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            operator: operator.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub uuid: Uuid,
    pub identifier: String,
    pub name: String,
    pub step_type: String,
    pub parameters: serde_json::Value,
    pub facilitator: FacilitatorMode,
    pub advisers: Vec<AdviserSpec>,
    pub skip_condition: Option<SkipCondition>,
    pub timeout_ms: Option<i64>,
}

impl PlanNode {
    pub fn new(
        identifier: impl Into<String>,
        step_type: impl Into<String>,
        facilitator: FacilitatorMode,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: Uuid::new_v4(),
            name: identifier.clone(),
            identifier,
            step_type: step_type.into(),
            parameters: serde_json::Value::Null,
            facilitator,
            advisers: Vec::new(),
            skip_condition: None,
            timeout_ms: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_adviser(mut self, spec: AdviserSpec) -> Self {
        self.advisers.push(spec);
        self
    }

    pub fn with_skip_condition(mut self, condition: SkipCondition) -> Self {
        self.skip_condition = Some(condition);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Identity node: same semantic content under a fresh uuid, used to
    /// re-run one strategy iteration without replanning the graph.
    pub fn identity_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.uuid = Uuid::new_v4();
        copy
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    nodes: HashMap<Uuid, PlanNode>,
    start_node_id: Uuid,
}

impl Plan {
    pub fn new(start_node: PlanNode) -> Self {
        let start_node_id = start_node.uuid;
        let mut nodes = HashMap::new();
        nodes.insert(start_node_id, start_node);
        Self {
            nodes,
            start_node_id,
        }
    }

    pub fn add_node(&mut self, node: PlanNode) {
        self.nodes.insert(node.uuid, node);
    }

    pub fn get_node(&self, id: Uuid) -> Result<&PlanNode, CoreError> {
        self.nodes.get(&id).ok_or(CoreError::PlanNodeNotFound(id))
    }

    pub fn start_node_id(&self) -> Uuid {
        self.start_node_id
    }
}
