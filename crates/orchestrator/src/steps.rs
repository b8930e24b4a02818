//! Step execution contract.
//!
//! Step business logic lives outside the engine. Each step type registers a
//! [`StepHandler`]; the engine dispatches polymorphically through the
//! immutable [`StepRegistry`]. An unregistered step type is a fatal
//! configuration error, not a retryable one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use windlass_core::{
    Ambiance, ExecutionStatus, FailureInfo, PlanNode, StrategyMetadata,
};

use crate::error::{OrchestratorError, Result};
use crate::outputs::OutputStore;
use crate::wait_notify::NotifyPayload;

/// What a handler sees when it runs.
pub struct StepContext<'a> {
    pub ambiance: &'a Ambiance,
    pub node: &'a PlanNode,
    pub outputs: &'a OutputStore,
}

/// Terminal result of a step, fed into the adviser chain.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub status: ExecutionStatus,
    pub failure: Option<FailureInfo>,
    /// Outcomes to publish into the enclosing scope before advisers run.
    pub outcomes: Vec<(String, serde_json::Value)>,
}

impl StepResult {
    pub fn succeeded() -> Self {
        Self {
            status: ExecutionStatus::Succeeded,
            failure: None,
            outcomes: Vec::new(),
        }
    }

    pub fn failed(failure: FailureInfo) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            failure: Some(failure),
            outcomes: Vec::new(),
        }
    }

    pub fn expired(failure: FailureInfo) -> Self {
        Self {
            status: ExecutionStatus::Expired,
            failure: Some(failure),
            outcomes: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.outcomes.push((name.into(), value));
        self
    }
}

/// Work shipped to a remote worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub timeout_ms: Option<i64>,
}

/// One child of a fan-out, carrying its own plan-node snapshot (identity
/// copies for strategy iterations never enter the static plan).
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub node: PlanNode,
    pub strategy_metadata: Option<StrategyMetadata>,
}

#[derive(Debug, Clone)]
pub struct ChildrenRequest {
    pub children: Vec<ChildSpec>,
    pub max_concurrency: usize,
    pub proceed_if_failed: bool,
}

/// What a step asks the engine to do.
#[derive(Debug, Clone)]
pub enum StepResponse {
    /// Done within the engine call.
    Completed(StepResult),
    /// Suspend until the given correlation ids are published.
    AsyncAwait {
        correlation_ids: Vec<String>,
        timeout_ms: Option<i64>,
    },
    /// Dispatch to a remote worker and suspend until it reports back.
    Task(TaskRequest),
    /// Fan out child executions under the bounded-concurrency scheduler.
    Children(ChildrenRequest),
    /// Arrive at a barrier and suspend until the group resolves.
    Barrier { group_id: String },
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    /// First invocation of the step.
    async fn execute(&self, ctx: StepContext<'_>) -> Result<StepResponse>;

    /// Invoked when a suspended step's correlation ids have all been
    /// published (or timed out). Default: steps that never suspend.
    async fn handle_async_response(
        &self,
        _ctx: StepContext<'_>,
        _responses: HashMap<String, NotifyPayload>,
    ) -> Result<StepResult> {
        Ok(StepResult::succeeded())
    }
}

/// Immutable step-type table, built once at process start.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    pub fn resolve(&self, step_type: &str) -> Result<Arc<dyn StepHandler>> {
        self.handlers
            .get(step_type)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStepType(step_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct StepRegistryBuilder {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistryBuilder {
    pub fn register(mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(step_type.into(), handler);
        self
    }

    pub fn build(self) -> StepRegistry {
        StepRegistry {
            handlers: self.handlers,
        }
    }
}
