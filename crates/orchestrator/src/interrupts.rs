//! Interrupt manager.
//!
//! Interrupts are append-only facts applied onto running node executions.
//! Abort of a task-mode node round-trips through the remote worker (cancel
//! request, then correlator-awaited acknowledgment with a grace deadline);
//! sync and pass-through parents abort locally. Repair-style interrupts
//! (retry, ignore, mark-success, mark-failed, custom-failure) resolve an
//! intervention-waiting node through the adviser-response path. When an
//! intervention deadline expires unattended, the monitor synthesizes the
//! interrupt mapped from the node's stored repair action.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use events::Event;
use windlass_core::{
    ExecutionStatus, FailureCategory, FailureInfo, Interrupt, InterruptConfig, InterruptEffect,
    InterruptState, InterruptType, NodeExecution, RepairAction, RetryPolicy,
};

use crate::advise;
use crate::context::EngineContext;
use crate::engine::WorkItem;
use crate::error::{OrchestratorError, Result};
use crate::wait_notify::NotifyCallback;

/// What a caller submits to interrupt a plan or node execution.
#[derive(Debug, Clone)]
pub struct InterruptPackage {
    pub interrupt_type: InterruptType,
    pub plan_execution_id: Uuid,
    pub node_execution_id: Option<Uuid>,
    pub config: InterruptConfig,
}

pub(crate) fn abort_correlation_id(node_execution_id: Uuid) -> String {
    format!("abort::{node_execution_id}")
}

/// Validate, persist and apply an interrupt. Returns the registered
/// interrupt plus the work items its application produced.
pub(crate) async fn register(
    ctx: &Arc<EngineContext>,
    package: InterruptPackage,
) -> Result<(Interrupt, Vec<WorkItem>)> {
    let target = match package.node_execution_id {
        Some(node_id) => {
            let exec = ctx.node_executions.get(node_id).await?;
            if !exec.status.is_discontinuable() {
                return Err(OrchestratorError::NotInterruptible {
                    id: node_id,
                    status: exec.status,
                });
            }
            Some(exec)
        }
        None if package.interrupt_type.is_plan_wide() => None,
        None => {
            return Err(OrchestratorError::InvalidTransition {
                from: "plan".to_string(),
                to: format!("{} without a target node", package.interrupt_type.as_str()),
            });
        }
    };

    let interrupt = Interrupt::new(
        package.interrupt_type,
        package.plan_execution_id,
        package.node_execution_id,
        package.config,
    );
    ctx.interrupts.create(&interrupt).await?;
    ctx.emit(Event::InterruptRegistered {
        interrupt_id: interrupt.uuid,
        plan_execution_id: interrupt.plan_execution_id,
        interrupt_type: interrupt.interrupt_type,
    });
    ctx.interrupts
        .update_state(interrupt.uuid, InterruptState::Registered, InterruptState::Processing)
        .await?;

    info!(
        interrupt_id = %interrupt.uuid,
        interrupt_type = %interrupt.interrupt_type.as_str(),
        plan_execution_id = %interrupt.plan_execution_id,
        issued_by = %interrupt.config.issued_by,
        "Interrupt registered"
    );

    let items = apply(ctx, &interrupt, target).await?;
    Ok((interrupt, items))
}

async fn apply(
    ctx: &Arc<EngineContext>,
    interrupt: &Interrupt,
    target: Option<NodeExecution>,
) -> Result<Vec<WorkItem>> {
    match interrupt.interrupt_type {
        InterruptType::Abort => {
            let Some(exec) = target else {
                conclude(ctx, interrupt, false).await?;
                return Ok(Vec::new());
            };
            let (items, went_remote) = abort_node(ctx, interrupt, exec).await?;
            if !went_remote {
                conclude(ctx, interrupt, true).await?;
            }
            Ok(items)
        }
        InterruptType::AbortAll => {
            let mut items = Vec::new();
            let open = ctx
                .node_executions
                .find_by_plan_with_statuses(
                    interrupt.plan_execution_id,
                    ExecutionStatus::all_non_terminal(),
                )
                .await?;
            for exec in open {
                let (more, _) = abort_node(ctx, interrupt, exec).await?;
                items.extend(more);
            }
            conclude(ctx, interrupt, true).await?;
            Ok(items)
        }
        InterruptType::PauseAll => {
            // The standing Processing row is the pause itself; facilitation
            // checks it before launching queued nodes.
            info!(plan_execution_id = %interrupt.plan_execution_id, "Plan paused");
            Ok(Vec::new())
        }
        InterruptType::ResumeAll => {
            for open in ctx.interrupts.find_open_by_plan(interrupt.plan_execution_id).await? {
                if open.interrupt_type == InterruptType::PauseAll {
                    ctx.interrupts
                        .update_state(
                            open.uuid,
                            open.state,
                            InterruptState::ProcessedSuccessfully,
                        )
                        .await?;
                }
            }
            let queued = ctx
                .node_executions
                .find_by_plan_with_statuses(
                    interrupt.plan_execution_id,
                    &[ExecutionStatus::Queued],
                )
                .await?;
            conclude(ctx, interrupt, true).await?;
            info!(
                plan_execution_id = %interrupt.plan_execution_id,
                requeued = queued.len(),
                "Plan resumed"
            );
            Ok(queued.into_iter().map(|e| WorkItem::StartNode(e.uuid)).collect())
        }
        InterruptType::Retry
        | InterruptType::Ignore
        | InterruptType::MarkSuccess
        | InterruptType::MarkFailed
        | InterruptType::CustomFailure => {
            let Some(exec) = target else {
                conclude(ctx, interrupt, false).await?;
                return Ok(Vec::new());
            };
            resolve_repair(ctx, interrupt, exec).await
        }
    }
}

/// Abort one node execution, honoring its execution mode. Returns the
/// produced work plus whether the abort went out to a remote worker.
async fn abort_node(
    ctx: &Arc<EngineContext>,
    interrupt: &Interrupt,
    exec: NodeExecution,
) -> Result<(Vec<WorkItem>, bool)> {
    if !exec.status.is_discontinuable() {
        return Ok((Vec::new(), false));
    }

    ctx.node_executions
        .append_interrupt_effect(exec.uuid, &InterruptEffect::new(interrupt))
        .await?;

    let remote_task = exec
        .executable_response
        .as_ref()
        .and_then(|r| r.task_id())
        .map(str::to_string);

    if !ctx.transition(&exec, ExecutionStatus::Discontinuing).await? {
        return Ok((Vec::new(), false));
    }

    match remote_task {
        Some(task_id) => {
            // Best-effort cancel; the grace deadline guarantees progress
            // whether or not the worker ever answers.
            if let Err(error) = ctx.dispatcher.request_cancel(&task_id).await {
                warn!(task_id = %task_id, error = %error, "Task cancel request failed");
            }
            let deadline = Utc::now() + Duration::milliseconds(ctx.config.abort_grace_ms);
            let ready = ctx
                .correlator
                .wait_for(
                    vec![abort_correlation_id(exec.uuid)],
                    NotifyCallback::AbortAck {
                        node_execution_id: exec.uuid,
                        interrupt_id: interrupt.uuid,
                    },
                    Some(deadline),
                )
                .await?;
            Ok((ready.into_iter().map(WorkItem::Callback).collect(), true))
        }
        None => {
            // Sync and pass-through modes have no remote leg.
            Ok((
                vec![WorkItem::end(exec.uuid, ExecutionStatus::Aborted, None)],
                false,
            ))
        }
    }
}

/// The worker acknowledged the cancellation — or the grace period expired.
/// Either way the node aborts locally now.
pub(crate) async fn finish_abort(
    ctx: &Arc<EngineContext>,
    node_execution_id: Uuid,
    interrupt_id: Uuid,
) -> Result<Vec<WorkItem>> {
    if let Some(interrupt) = ctx.interrupts.find_by_id(interrupt_id).await? {
        conclude(ctx, &interrupt, true).await?;
    }
    Ok(vec![WorkItem::end(
        node_execution_id,
        ExecutionStatus::Aborted,
        None,
    )])
}

/// Repair-style interrupts resolve an intervention-waiting node through
/// the same path an adviser decision would take.
async fn resolve_repair(
    ctx: &Arc<EngineContext>,
    interrupt: &Interrupt,
    exec: NodeExecution,
) -> Result<Vec<WorkItem>> {
    if exec.status != ExecutionStatus::InterventionWaiting {
        warn!(
            node_execution_id = %exec.uuid,
            status = %exec.status,
            interrupt_type = %interrupt.interrupt_type.as_str(),
            "Repair interrupt targets a node not awaiting intervention"
        );
        conclude(ctx, interrupt, false).await?;
        return Ok(Vec::new());
    }

    ctx.node_executions
        .append_interrupt_effect(exec.uuid, &InterruptEffect::new(interrupt))
        .await?;
    ctx.node_executions.save_intervention(exec.uuid, None).await?;

    let items = match interrupt.interrupt_type {
        InterruptType::MarkSuccess => {
            vec![WorkItem::end(exec.uuid, ExecutionStatus::Succeeded, None)]
        }
        InterruptType::MarkFailed => vec![WorkItem::end(
            exec.uuid,
            ExecutionStatus::Failed,
            exec.failure.clone(),
        )],
        // The failure stays on the record; the branch proceeds as green.
        InterruptType::Ignore => {
            vec![WorkItem::end(exec.uuid, ExecutionStatus::Succeeded, None)]
        }
        InterruptType::CustomFailure => {
            let message = interrupt
                .config
                .reason
                .clone()
                .unwrap_or_else(|| "custom failure".to_string());
            vec![WorkItem::end(
                exec.uuid,
                ExecutionStatus::Failed,
                Some(FailureInfo::new(FailureCategory::Business, message)),
            )]
        }
        InterruptType::Retry => {
            let policy = retry_policy_of(&exec);
            advise::apply_retry(ctx, &exec, &policy, ExecutionStatus::Failed, exec.failure.clone())
                .await?
        }
        other => {
            warn!(interrupt_type = %other.as_str(), "Non-repair interrupt in repair path");
            Vec::new()
        }
    };

    conclude(ctx, interrupt, true).await?;
    Ok(items)
}

fn retry_policy_of(exec: &NodeExecution) -> RetryPolicy {
    exec.node
        .advisers
        .iter()
        .find_map(|spec| match &spec.kind {
            windlass_core::AdviserKind::Retry { policy } => Some(*policy),
            _ => None,
        })
        .unwrap_or_default()
}

async fn conclude(ctx: &EngineContext, interrupt: &Interrupt, success: bool) -> Result<()> {
    let to = if success {
        InterruptState::ProcessedSuccessfully
    } else {
        InterruptState::ProcessedUnsuccessfully
    };
    ctx.interrupts
        .update_state(interrupt.uuid, InterruptState::Processing, to)
        .await?;
    ctx.emit(Event::InterruptProcessed {
        interrupt_id: interrupt.uuid,
        plan_execution_id: interrupt.plan_execution_id,
        interrupt_type: interrupt.interrupt_type,
        success,
    });
    Ok(())
}

/// Monitor pass: nodes whose intervention deadline expired get the
/// interrupt synthesized from their stored repair action, so an unattended
/// pipeline never hangs on a manual step.
pub(crate) async fn sweep_interventions(
    ctx: &Arc<EngineContext>,
    now: DateTime<Utc>,
) -> Result<Vec<WorkItem>> {
    let mut items = Vec::new();
    for exec in ctx.node_executions.find_expired_interventions(now).await? {
        let Some(details) = &exec.intervention else {
            continue;
        };
        let interrupt_type = match details.repair {
            RepairAction::MarkAsSuccess => InterruptType::MarkSuccess,
            RepairAction::Retry => InterruptType::Retry,
            RepairAction::Ignore => InterruptType::Ignore,
            RepairAction::OnFail => InterruptType::MarkFailed,
            RepairAction::StageRollback | RepairAction::StepGroupRollback => {
                InterruptType::CustomFailure
            }
            RepairAction::EndExecution => InterruptType::AbortAll,
        };

        info!(
            node_execution_id = %exec.uuid,
            repair = ?details.repair,
            synthesized = %interrupt_type.as_str(),
            "Intervention window expired, applying repair action"
        );

        let package = InterruptPackage {
            interrupt_type,
            plan_execution_id: exec.ambiance.plan_execution_id,
            node_execution_id: if interrupt_type.is_plan_wide() {
                None
            } else {
                Some(exec.uuid)
            },
            config: InterruptConfig::system("intervention timeout"),
        };

        match register(ctx, package).await {
            Ok((_, more)) => items.extend(more),
            Err(error) => warn!(
                node_execution_id = %exec.uuid,
                error = %error,
                "Failed to synthesize repair interrupt"
            ),
        }
    }
    Ok(items)
}
