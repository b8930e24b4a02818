//! Shared engine context.
//!
//! Everything the engine subsystems need to do their work: repositories,
//! the correlator, the step registry, external seams and configuration.
//! One context is built at startup and shared behind an `Arc`.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use db::{
    AdvisoryLock, BarrierRepository, ChildrenRepository, DocumentRepository, InterruptRepository,
    LockRepository, NodeExecutionRepository, WaiterRepository,
};
use events::{Event, EventBus, EventEnvelope};
use windlass_core::{ExecutionStatus, NodeExecution};

use crate::conditions::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::outputs::OutputStore;
use crate::providers::{PlanProvider, TaskDispatcher};
use crate::state_machine::ExecutionStateMachine;
use crate::steps::StepRegistry;
use crate::wait_notify::WaitNotify;

pub struct EngineContext {
    pub(crate) node_executions: NodeExecutionRepository,
    pub(crate) interrupts: InterruptRepository,
    pub(crate) barriers: BarrierRepository,
    pub(crate) children: ChildrenRepository,
    pub(crate) locks: LockRepository,
    pub(crate) outputs: OutputStore,
    pub(crate) correlator: WaitNotify,
    pub(crate) registry: StepRegistry,
    pub(crate) conditions: ConditionEvaluator,
    pub(crate) dispatcher: Arc<dyn TaskDispatcher>,
    pub(crate) plan: Arc<dyn PlanProvider>,
    pub(crate) bus: EventBus,
    pub(crate) config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        pool: SqlitePool,
        registry: StepRegistry,
        dispatcher: Arc<dyn TaskDispatcher>,
        plan: Arc<dyn PlanProvider>,
        bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            node_executions: NodeExecutionRepository::new(pool.clone()),
            interrupts: InterruptRepository::new(pool.clone()),
            barriers: BarrierRepository::new(pool.clone()),
            children: ChildrenRepository::new(pool.clone()),
            locks: LockRepository::new(pool.clone()),
            outputs: OutputStore::new(DocumentRepository::new(pool.clone())),
            correlator: WaitNotify::new(WaiterRepository::new(pool)),
            registry,
            conditions: ConditionEvaluator::standard(),
            dispatcher,
            plan,
            bus,
            config,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        self.bus.publish(EventEnvelope::new(event));
    }

    /// Validated compare-and-swap on a node execution's status. Returns
    /// false when another writer moved the node first; the caller treats
    /// that as an idempotent no-op.
    pub(crate) async fn transition(
        &self,
        exec: &NodeExecution,
        to: ExecutionStatus,
    ) -> Result<bool> {
        ExecutionStateMachine::validate_transition(exec.status, to)?;
        let moved = self
            .node_executions
            .update_status(exec.uuid, &[exec.status], to)
            .await?;
        if moved {
            debug!(
                node_execution_id = %exec.uuid,
                from = %exec.status,
                to = %to,
                "Node execution transitioned"
            );
            self.emit(Event::NodeStatusChanged {
                node_execution_id: exec.uuid,
                plan_execution_id: exec.ambiance.plan_execution_id,
                from_status: exec.status,
                to_status: to,
            });
        }
        Ok(moved)
    }

    /// Acquire a named advisory lock or fail with a transient error. The
    /// lock serializes read-modify-write races between sibling completions;
    /// it is never held across remote I/O.
    pub(crate) async fn lock(&self, key: &str) -> Result<AdvisoryLock> {
        self.locks
            .try_acquire(key, self.config.lock_wait, self.config.lock_hold)
            .await?
            .ok_or_else(|| OrchestratorError::LockTimeout(key.to_string()))
    }

    pub(crate) async fn unlock(&self, lock: AdvisoryLock) {
        if let Err(error) = self.locks.release(lock).await {
            tracing::warn!(error = %error, "Failed to release advisory lock");
        }
    }
}
