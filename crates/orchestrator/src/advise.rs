//! Adviser chain.
//!
//! When a step finishes, the node's ordered adviser list decides what
//! happens next. The first spec whose status condition matches wins;
//! declaration order in the plan is the only precedence. Failures the
//! chain does not claim simply end the node with the step's own status —
//! the engine itself never hard-codes failure policy.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use events::Event;
use windlass_core::{
    AdviserDecision, AdviserKind, ExecutionStatus, FailureInfo, InterruptConfig, InterruptType,
    InterventionDetails, NodeExecution, RetryPolicy,
};

use crate::context::EngineContext;
use crate::engine::WorkItem;
use crate::error::Result;
use crate::interrupts::{self, InterruptPackage};
use crate::lifecycle;
use crate::steps::StepResult;
use crate::wait_notify::NotifyCallback;

pub(crate) async fn process_result(
    ctx: &Arc<EngineContext>,
    id: Uuid,
    result: StepResult,
) -> Result<Vec<WorkItem>> {
    let exec = ctx.node_executions.get(id).await?;
    if exec.status != ExecutionStatus::Running {
        warn!(
            node_execution_id = %id,
            status = %exec.status,
            "Step result for non-running node, ignoring"
        );
        return Ok(Vec::new());
    }

    for (name, value) in &result.outcomes {
        if let Err(e) = ctx
            .outputs
            .publish_outcome(&exec.ambiance, name, value.clone())
            .await
        {
            // Publishing the same name twice into one scope is a producer
            // bug, not something to leave hanging.
            return Ok(vec![WorkItem::end(
                id,
                ExecutionStatus::Failed,
                Some(FailureInfo::new(
                    windlass_core::FailureCategory::Configuration,
                    e.to_string(),
                )),
            )]);
        }
    }
    if let Some(failure) = &result.failure {
        ctx.node_executions.save_failure(id, failure).await?;
    }

    let Some(spec) = exec
        .node
        .advisers
        .iter()
        .find(|spec| spec.matches(result.status))
        .cloned()
    else {
        return Ok(vec![WorkItem::end(id, result.status, result.failure)]);
    };

    let decision = AdviserDecision {
        kind: spec.kind.clone(),
        status: result.status,
    };
    ctx.node_executions.save_adviser_decision(id, &decision).await?;

    match spec.kind {
        AdviserKind::NextStep => Ok(vec![WorkItem::end(id, result.status, result.failure)]),
        AdviserKind::Retry { policy } => {
            apply_retry(ctx, &exec, &policy, result.status, result.failure).await
        }
        AdviserKind::Intervene { repair, timeout_ms } => {
            let timeout_ms = if timeout_ms > 0 {
                timeout_ms
            } else {
                ctx.config.default_intervention_timeout_ms
            };
            let details = InterventionDetails {
                repair,
                deadline: Utc::now() + Duration::milliseconds(timeout_ms),
            };
            if ctx.transition(&exec, ExecutionStatus::InterventionWaiting).await? {
                ctx.node_executions
                    .save_intervention(id, Some(&details))
                    .await?;
                info!(
                    node_execution_id = %id,
                    repair = ?repair,
                    deadline = %details.deadline,
                    "Node awaiting intervention"
                );
            }
            Ok(Vec::new())
        }
        AdviserKind::EndPlan => {
            // End this node before the plan-wide abort scans for open ones.
            let mut items =
                lifecycle::end_node(ctx, id, result.status, result.failure, true).await?;
            let package = InterruptPackage {
                interrupt_type: InterruptType::AbortAll,
                plan_execution_id: exec.ambiance.plan_execution_id,
                node_execution_id: None,
                config: InterruptConfig::system("end_plan adviser"),
            };
            let (_, abort_items) = interrupts::register(ctx, package).await?;
            items.extend(abort_items);
            Ok(items)
        }
    }
}

/// Spawn a fresh execution for the node (identity copy, `previous_id`
/// chained) and retire the old one without notifying the parent — the
/// retry takes over its slot.
pub(crate) async fn apply_retry(
    ctx: &Arc<EngineContext>,
    exec: &NodeExecution,
    policy: &RetryPolicy,
    failing_status: ExecutionStatus,
    failure: Option<FailureInfo>,
) -> Result<Vec<WorkItem>> {
    let max_retries = policy.max_attempts.min(ctx.config.max_retry_attempts);
    if exec.retry_index >= max_retries {
        info!(
            node_execution_id = %exec.uuid,
            retry_index = exec.retry_index,
            "Retries exhausted"
        );
        return Ok(vec![WorkItem::end(exec.uuid, failing_status, failure)]);
    }

    let retry = exec.retry_copy();
    ctx.node_executions.create(&retry).await?;

    // The retry inherits the old execution's slot in the parent's fan-out.
    if let Some(parent_id) = exec.parent_id {
        swap_child_slot(ctx, parent_id, exec.uuid, retry.uuid).await?;
        ctx.correlator
            .wait_for(
                vec![retry.uuid.to_string()],
                NotifyCallback::ChildCompleted {
                    parent_node_execution_id: parent_id,
                    child_execution_id: retry.uuid,
                },
                None,
            )
            .await?;
    }

    ctx.emit(Event::NodeRetryScheduled {
        node_execution_id: exec.uuid,
        plan_execution_id: exec.ambiance.plan_execution_id,
        retry_execution_id: retry.uuid,
        retry_index: retry.retry_index,
    });

    let mut items = vec![WorkItem::EndNode {
        node_execution_id: exec.uuid,
        status: failing_status,
        failure,
        notify_parent: false,
    }];

    let delay_ms = policy.delay_ms(exec.retry_index);
    if delay_ms == 0 {
        items.push(WorkItem::StartNode(retry.uuid));
    } else {
        // Backoff rides the correlator's deadline machinery: nothing ever
        // publishes this id, so the monitor fires the kick when it is due.
        let deadline = Utc::now() + Duration::milliseconds(delay_ms as i64);
        let ready = ctx
            .correlator
            .wait_for(
                vec![format!("retry::{}", retry.uuid)],
                NotifyCallback::KickNode {
                    node_execution_id: retry.uuid,
                },
                Some(deadline),
            )
            .await?;
        items.extend(ready.into_iter().map(WorkItem::Callback));
    }
    Ok(items)
}

/// Replace one child execution id with its retry in the parent's
/// concurrent-child bookkeeping, under the parent's completion lock.
async fn swap_child_slot(
    ctx: &EngineContext,
    parent_id: Uuid,
    old_child: Uuid,
    new_child: Uuid,
) -> Result<()> {
    let lock = ctx.lock(&format!("children::{parent_id}")).await?;
    let result = async {
        let Some((mut instance, version)) = ctx.children.find_by_parent(parent_id).await? else {
            return Ok(());
        };
        let Some(slot) = instance
            .children_node_execution_ids
            .iter()
            .position(|id| *id == old_child)
        else {
            return Ok(());
        };
        instance.children_node_execution_ids[slot] = new_child;
        if !ctx.children.save_children(&instance, version).await? {
            warn!(parent_id = %parent_id, "Lost child-slot swap race");
        }
        Ok(())
    }
    .await;
    ctx.unlock(lock).await;
    result
}
