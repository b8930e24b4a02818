//! The orchestration engine.
//!
//! The engine is a deterministic work-queue driver over durable state:
//! every entry point (starting a plan, a published task result, an
//! interrupt, a monitor sweep) reduces to a queue of [`WorkItem`]s that is
//! drained to quiescence. Suspension points leave nothing in memory — a
//! parked node is represented entirely by its persisted execution row plus
//! a durable correlator waiter, so a process restart loses no work.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use events::{Event, EventBus};
use windlass_core::{
    Ambiance, ExecutionStatus, FailureCategory, FailureInfo, Interrupt, Level, NodeExecution,
};

use crate::barrier::{self, BarrierSpec};
use crate::children;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::Result;
use crate::interrupts::{self, InterruptPackage};
use crate::lifecycle;
use crate::outputs::OutputStore;
use crate::providers::{PlanProvider, TaskDispatcher};
use crate::steps::{StepRegistry, StepResult};
use crate::wait_notify::{NotifyPayload, ReadyCallback};

/// One unit of engine work. Items are produced by dispatching other items;
/// the driver drains until the queue is empty, at which point every node is
/// either terminal or parked on a durable suspension point.
#[derive(Clone)]
pub(crate) enum WorkItem {
    /// Facilitate a queued node execution.
    StartNode(Uuid),
    /// A claimed correlator delivery.
    Callback(ReadyCallback),
    /// Run the adviser chain over a finished step.
    ProcessResult {
        node_execution_id: Uuid,
        result: StepResult,
    },
    /// Drive a node execution to a terminal status.
    EndNode {
        node_execution_id: Uuid,
        status: ExecutionStatus,
        failure: Option<FailureInfo>,
        /// Suppressed when a retry execution replaces this one.
        notify_parent: bool,
    },
}

impl WorkItem {
    pub(crate) fn end(
        node_execution_id: Uuid,
        status: ExecutionStatus,
        failure: Option<FailureInfo>,
    ) -> Self {
        Self::EndNode {
            node_execution_id,
            status,
            failure,
            notify_parent: true,
        }
    }
}

/// Bounded local retries for transient infrastructure errors before the
/// item is abandoned to the reconciliation sweep.
const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Drain a queue of work items. Item failures never poison the queue:
/// transient errors are retried with backoff and then left for the
/// reconciliation sweep, the rest are surfaced as error events.
pub(crate) async fn drive(ctx: &Arc<EngineContext>, items: Vec<WorkItem>) {
    let mut queue: VecDeque<WorkItem> = items.into();
    while let Some(item) = queue.pop_front() {
        let mut attempt = 0u32;
        loop {
            match dispatch(ctx, item.clone()).await {
                Ok(more) => {
                    queue.extend(more);
                    break;
                }
                Err(e) if e.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Transient engine error, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(50u64 << attempt)).await;
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Transient retries exhausted, leaving state for sweep");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Engine work item failed");
                    ctx.emit(Event::Error {
                        message: e.to_string(),
                        plan_execution_id: None,
                    });
                    break;
                }
            }
        }
    }
}

async fn dispatch(ctx: &Arc<EngineContext>, item: WorkItem) -> Result<Vec<WorkItem>> {
    match item {
        WorkItem::StartNode(id) => lifecycle::run_node(ctx, id).await,
        WorkItem::ProcessResult {
            node_execution_id,
            result,
        } => crate::advise::process_result(ctx, node_execution_id, result).await,
        WorkItem::EndNode {
            node_execution_id,
            status,
            failure,
            notify_parent,
        } => lifecycle::end_node(ctx, node_execution_id, status, failure, notify_parent).await,
        WorkItem::Callback(ready) => dispatch_callback(ctx, ready).await,
    }
}

async fn dispatch_callback(ctx: &Arc<EngineContext>, ready: ReadyCallback) -> Result<Vec<WorkItem>> {
    use crate::wait_notify::NotifyCallback::*;

    let timed_out = ready.results.values().any(NotifyPayload::is_timeout);
    let items = match ready.callback {
        ResumeNode { node_execution_id } => {
            lifecycle::resume_node(ctx, node_execution_id, ready.results).await?
        }
        ChildCompleted {
            parent_node_execution_id,
            child_execution_id,
        } => {
            children::on_child_completed(
                ctx,
                parent_node_execution_id,
                child_execution_id,
                &ready.results,
            )
            .await?
        }
        AbortAck {
            node_execution_id,
            interrupt_id,
        } => interrupts::finish_abort(ctx, node_execution_id, interrupt_id).await?,
        BarrierReleased { node_execution_id } => {
            barrier::on_released(ctx, node_execution_id, &ready.results).await?
        }
        KickNode { node_execution_id } => vec![WorkItem::StartNode(node_execution_id)],
    };
    ctx.correlator.complete(ready.waiter_id, timed_out).await?;
    Ok(items)
}

/// Force-error every non-terminal node of a plan execution. The repair of
/// last resort when coordination state is lost.
pub(crate) async fn force_error_plan(
    ctx: &EngineContext,
    plan_execution_id: Uuid,
    reason: &str,
) -> Result<Vec<WorkItem>> {
    let stuck = ctx
        .node_executions
        .find_by_plan_with_statuses(plan_execution_id, ExecutionStatus::all_non_terminal())
        .await?;

    warn!(
        plan_execution_id = %plan_execution_id,
        affected = stuck.len(),
        reason,
        "Force-erroring plan subtree"
    );

    Ok(stuck
        .into_iter()
        .map(|exec| {
            WorkItem::end(
                exec.uuid,
                ExecutionStatus::Errored,
                Some(FailureInfo::new(FailureCategory::LostState, reason)),
            )
        })
        .collect())
}

pub struct OrchestrationEngine {
    ctx: Arc<EngineContext>,
}

impl OrchestrationEngine {
    pub fn builder(pool: SqlitePool, plan: Arc<dyn PlanProvider>) -> EngineBuilder {
        EngineBuilder {
            pool,
            plan,
            registry: StepRegistry::default(),
            dispatcher: None,
            bus: EventBus::new(),
            config: EngineConfig::default(),
        }
    }

    /// Create the root node execution for a plan execution and drive it
    /// until every branch is terminal or durably suspended.
    pub async fn start_plan_execution(
        &self,
        plan_execution_id: Uuid,
        account_id: &str,
        org_id: &str,
        project_id: &str,
    ) -> Result<Uuid> {
        let base = Ambiance::new(plan_execution_id, account_id, org_id, project_id);
        let node = self.ctx.plan.get_node(self.ctx.plan.start_node_id())?;

        let exec_uuid = Uuid::new_v4();
        let ambiance = base.child(Level::new(node.uuid, exec_uuid, node.identifier.clone()));
        let exec = NodeExecution::new(exec_uuid, ambiance, node, None);
        self.ctx.node_executions.create(&exec).await?;

        info!(
            plan_execution_id = %plan_execution_id,
            node_execution_id = %exec_uuid,
            "Plan execution started"
        );

        drive(&self.ctx, vec![WorkItem::StartNode(exec_uuid)]).await;
        Ok(exec_uuid)
    }

    /// At-least-once redelivery entry: re-kick a queued node execution.
    /// A no-op for anything already running or terminal.
    pub async fn kick(&self, node_execution_id: Uuid) -> Result<()> {
        drive(&self.ctx, vec![WorkItem::StartNode(node_execution_id)]).await;
        Ok(())
    }

    /// Publish a correlation result — the callback path for remote workers
    /// and anything else that completes asynchronously.
    pub async fn publish(&self, correlation_id: &str, payload: NotifyPayload) -> Result<()> {
        let ready = self.ctx.correlator.publish(correlation_id, payload).await?;
        drive(&self.ctx, ready.into_iter().map(WorkItem::Callback).collect()).await;
        Ok(())
    }

    /// Register and apply an operator or system interrupt.
    pub async fn register_interrupt(&self, package: InterruptPackage) -> Result<Interrupt> {
        let (interrupt, items) = interrupts::register(&self.ctx, package).await?;
        drive(&self.ctx, items).await;
        Ok(interrupt)
    }

    /// Stand up barrier instances for a plan execution, with positions
    /// enumerated from the static plan.
    pub async fn create_barriers(
        &self,
        plan_execution_id: Uuid,
        specs: Vec<BarrierSpec>,
    ) -> Result<()> {
        barrier::init_for_plan(&self.ctx, plan_execution_id, specs).await
    }

    /// One monitor pass: expired waiters, expired barriers, expired
    /// intervention windows.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        let mut items: Vec<WorkItem> = Vec::new();

        for ready in self.ctx.correlator.expire_due(now).await? {
            items.push(WorkItem::Callback(ready));
        }
        items.extend(barrier::sweep_expired(&self.ctx, now).await?);
        items.extend(interrupts::sweep_interventions(&self.ctx, now).await?);

        drive(&self.ctx, items).await;
        Ok(())
    }

    /// Background deadline monitor.
    pub fn spawn_monitor(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let interval = ctx.config.sweep_interval;
        tokio::spawn(async move {
            let engine = OrchestrationEngine { ctx };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(error) = engine.sweep(Utc::now()).await {
                    error!(error = %error, "Monitor sweep failed");
                }
            }
        })
    }

    pub async fn node_execution(&self, id: Uuid) -> Result<NodeExecution> {
        Ok(self.ctx.node_executions.get(id).await?)
    }

    pub async fn plan_executions(&self, plan_execution_id: Uuid) -> Result<Vec<NodeExecution>> {
        Ok(self.ctx.node_executions.find_by_plan(plan_execution_id).await?)
    }

    pub fn outputs(&self) -> &OutputStore {
        &self.ctx.outputs
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.bus
    }
}

pub struct EngineBuilder {
    pool: SqlitePool,
    plan: Arc<dyn PlanProvider>,
    registry: StepRegistry,
    dispatcher: Option<Arc<dyn TaskDispatcher>>,
    bus: EventBus,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> OrchestrationEngine {
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(crate::providers::UnroutableDispatcher));
        OrchestrationEngine {
            ctx: Arc::new(EngineContext::new(
                self.pool,
                self.registry,
                dispatcher,
                self.plan,
                self.bus,
                self.config,
            )),
        }
    }
}
