//! Bounded-concurrency child scheduler.
//!
//! A strategy step fans out an ordered list of child executions with a
//! concurrency limit. All child executions are created up front (QUEUED);
//! only the first `max_concurrency` are facilitated. Each completion —
//! serialized per parent by an advisory lock and committed as one
//! version-guarded update — appends the child's status, advances the
//! cursor, and launches the next pending child. Fail-fast marks every
//! unlaunched child SKIPPED instead.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use windlass_core::{
    ConcurrentChildInstance, ExecutableResponse, ExecutionStatus, Level, NodeExecution,
};

use crate::context::EngineContext;
use crate::engine::{force_error_plan, WorkItem};
use crate::error::Result;
use crate::lifecycle::child_status_from;
use crate::steps::{ChildrenRequest, StepResult};
use crate::wait_notify::{NotifyCallback, NotifyPayload};

/// Fan out the children of a strategy node.
pub(crate) async fn launch(
    ctx: &Arc<EngineContext>,
    parent: &NodeExecution,
    request: ChildrenRequest,
) -> Result<Vec<WorkItem>> {
    if request.children.is_empty() {
        // Nothing to run; the strategy node succeeds vacuously.
        return Ok(vec![WorkItem::ProcessResult {
            node_execution_id: parent.uuid,
            result: StepResult::succeeded(),
        }]);
    }

    let mut child_ids = Vec::with_capacity(request.children.len());
    for spec in &request.children {
        let child_uuid = Uuid::new_v4();
        let mut level = Level::new(spec.node.uuid, child_uuid, spec.node.identifier.clone());
        if let Some(metadata) = spec.strategy_metadata {
            level = level.with_strategy(metadata);
        }
        let ambiance = parent.ambiance.child(level);
        let exec = NodeExecution::new(child_uuid, ambiance, spec.node.clone(), Some(parent.uuid));
        ctx.node_executions.create(&exec).await?;
        child_ids.push(child_uuid);
    }

    let instance = ConcurrentChildInstance::new(
        parent.uuid,
        parent.ambiance.plan_execution_id,
        child_ids.clone(),
        request.max_concurrency,
        request.proceed_if_failed,
    );
    ctx.children.create(&instance).await?;

    ctx.node_executions
        .save_executable_response(
            parent.uuid,
            &ExecutableResponse::Children {
                children: child_ids.clone(),
                max_concurrency: instance.max_concurrency,
                proceed_if_failed: instance.proceed_if_failed,
            },
        )
        .await?;

    // One durable waiter per child; completions fan back in through the
    // correlator regardless of when each child is actually launched.
    for child_id in &child_ids {
        ctx.correlator
            .wait_for(
                vec![child_id.to_string()],
                NotifyCallback::ChildCompleted {
                    parent_node_execution_id: parent.uuid,
                    child_execution_id: *child_id,
                },
                None,
            )
            .await?;
    }

    info!(
        parent_node_execution_id = %parent.uuid,
        children = child_ids.len(),
        max_concurrency = instance.max_concurrency,
        "Strategy fan-out launched"
    );

    Ok(instance
        .initial_batch()
        .iter()
        .map(|id| WorkItem::StartNode(*id))
        .collect())
}

/// One child finished. Serialized per parent by the children lock.
pub(crate) async fn on_child_completed(
    ctx: &Arc<EngineContext>,
    parent_id: Uuid,
    child_id: Uuid,
    results: &HashMap<String, NotifyPayload>,
) -> Result<Vec<WorkItem>> {
    let lock = ctx.lock(&format!("children::{parent_id}")).await?;
    let outcome = advance_instance(ctx, parent_id, child_id, results).await;
    ctx.unlock(lock).await;
    outcome
}

async fn advance_instance(
    ctx: &Arc<EngineContext>,
    parent_id: Uuid,
    child_id: Uuid,
    results: &HashMap<String, NotifyPayload>,
) -> Result<Vec<WorkItem>> {
    let Some((mut instance, version)) = ctx.children.find_by_parent(parent_id).await? else {
        // Lost coordination state: force-error the subtree, never guess.
        let parent = ctx.node_executions.get(parent_id).await?;
        return force_error_plan(
            ctx,
            parent.ambiance.plan_execution_id,
            "concurrent child instance lost",
        )
        .await;
    };

    let status = child_status_from(ctx, child_id, results).await?;
    instance.child_statuses.push(status);

    let fail_fast = !instance.proceed_if_failed && instance.any_broken();
    let mut items = Vec::new();

    if fail_fast {
        let skipped: Vec<Uuid> = instance.children_node_execution_ids[instance.cursor..].to_vec();
        instance.cursor = instance.children_node_execution_ids.len();
        if !skipped.is_empty() {
            info!(
                parent_node_execution_id = %parent_id,
                skipped = skipped.len(),
                "Fail-fast: skipping unlaunched children"
            );
        }
        items.extend(
            skipped
                .into_iter()
                .map(|id| WorkItem::end(id, ExecutionStatus::Skipped, None)),
        );
    } else if let Some(next) = instance.next_child() {
        instance.cursor += 1;
        items.push(WorkItem::StartNode(next));
    }

    if !ctx.children.advance(&instance, version).await? {
        // The lock serializes completions, so a stale version means the
        // bookkeeping is being rewritten underneath us; drop this event
        // and let the retry land on fresh state.
        warn!(parent_node_execution_id = %parent_id, "Stale child-instance version");
        return Ok(Vec::new());
    }

    if instance.all_completed() {
        let aggregate = instance.aggregate_status();
        info!(
            parent_node_execution_id = %parent_id,
            aggregate = %aggregate,
            "All children completed"
        );
        let result = StepResult {
            status: aggregate,
            failure: None,
            outcomes: Vec::new(),
        };
        items.push(WorkItem::ProcessResult {
            node_execution_id: parent_id,
            result,
        });
    }

    Ok(items)
}
