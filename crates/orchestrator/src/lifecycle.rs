//! Node-execution lifecycle: facilitation, async resumption, and the
//! terminal transition.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use events::Event;
use windlass_core::{
    BarrierArrival, ExecutableResponse, ExecutionStatus, FailureCategory, FailureInfo,
    NodeExecution,
};

use crate::barrier;
use crate::children;
use crate::context::EngineContext;
use crate::engine::WorkItem;
use crate::error::Result;
use crate::steps::{StepContext, StepResponse, StepResult};
use crate::wait_notify::{NotifyCallback, NotifyPayload};

/// Facilitate a queued node execution: evaluate the skip condition, claim
/// the QUEUED -> RUNNING transition, and invoke the step's execute
/// contract. Idempotent under at-least-once redelivery — anything not in
/// QUEUED is a no-op.
pub(crate) async fn run_node(ctx: &Arc<EngineContext>, id: Uuid) -> Result<Vec<WorkItem>> {
    let exec = ctx.node_executions.get(id).await?;
    if exec.status != ExecutionStatus::Queued {
        debug!(node_execution_id = %id, status = %exec.status, "Start redelivered, ignoring");
        return Ok(Vec::new());
    }

    // A standing PAUSE_ALL gates facilitation; RESUME_ALL re-kicks us.
    if ctx
        .interrupts
        .has_open_pause(exec.ambiance.plan_execution_id)
        .await?
    {
        debug!(node_execution_id = %id, "Plan paused, node stays queued");
        return Ok(Vec::new());
    }

    if let Some(condition) = &exec.node.skip_condition {
        match ctx.conditions.evaluate(condition, &exec.node.parameters) {
            Ok(true) => {
                info!(node_execution_id = %id, identifier = %exec.node.identifier, "Node skipped");
                return Ok(vec![WorkItem::end(id, ExecutionStatus::Skipped, None)]);
            }
            Ok(false) => {}
            Err(e) => {
                return Ok(vec![WorkItem::end(
                    id,
                    ExecutionStatus::Failed,
                    Some(FailureInfo::new(FailureCategory::Configuration, e.to_string())),
                )]);
            }
        }
    }

    if !ctx.transition(&exec, ExecutionStatus::Running).await? {
        return Ok(Vec::new());
    }

    let handler = match ctx.registry.resolve(&exec.node.step_type) {
        Ok(handler) => handler,
        Err(e) => {
            // Configuration error: fatal, no retry.
            return Ok(vec![WorkItem::end(
                id,
                ExecutionStatus::Failed,
                Some(FailureInfo::new(FailureCategory::Configuration, e.to_string())),
            )]);
        }
    };

    let response = handler
        .execute(StepContext {
            ambiance: &exec.ambiance,
            node: &exec.node,
            outputs: &ctx.outputs,
        })
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            return Ok(vec![WorkItem::end(
                id,
                ExecutionStatus::Errored,
                Some(FailureInfo::new(FailureCategory::Infrastructure, e.to_string())),
            )]);
        }
    };

    apply_step_response(ctx, &exec, response).await
}

async fn apply_step_response(
    ctx: &Arc<EngineContext>,
    exec: &NodeExecution,
    response: StepResponse,
) -> Result<Vec<WorkItem>> {
    match response {
        StepResponse::Completed(result) => {
            ctx.node_executions
                .save_executable_response(exec.uuid, &ExecutableResponse::Sync)
                .await?;
            Ok(vec![WorkItem::ProcessResult {
                node_execution_id: exec.uuid,
                result,
            }])
        }
        StepResponse::AsyncAwait {
            correlation_ids,
            timeout_ms,
        } => {
            ctx.node_executions
                .save_executable_response(
                    exec.uuid,
                    &ExecutableResponse::Async {
                        correlation_ids: correlation_ids.clone(),
                    },
                )
                .await?;
            let deadline = timeout_ms
                .or(exec.node.timeout_ms)
                .map(|ms| Utc::now() + Duration::milliseconds(ms));
            let ready = ctx
                .correlator
                .wait_for(
                    correlation_ids,
                    NotifyCallback::ResumeNode {
                        node_execution_id: exec.uuid,
                    },
                    deadline,
                )
                .await?;
            Ok(ready.into_iter().map(WorkItem::Callback).collect())
        }
        StepResponse::Task(request) => {
            let task_id = match ctx.dispatcher.submit(&request).await {
                Ok(task_id) => task_id,
                Err(e) => {
                    return Ok(vec![WorkItem::end(
                        exec.uuid,
                        ExecutionStatus::Errored,
                        Some(FailureInfo::new(
                            FailureCategory::Infrastructure,
                            e.to_string(),
                        )),
                    )]);
                }
            };
            ctx.node_executions
                .save_executable_response(
                    exec.uuid,
                    &ExecutableResponse::Task {
                        task_id: task_id.clone(),
                    },
                )
                .await?;
            ctx.emit(Event::TaskDispatched {
                node_execution_id: exec.uuid,
                plan_execution_id: exec.ambiance.plan_execution_id,
                task_id: task_id.clone(),
            });

            let deadline = request
                .timeout_ms
                .or(exec.node.timeout_ms)
                .map(|ms| Utc::now() + Duration::milliseconds(ms));
            let ready = ctx
                .correlator
                .wait_for(
                    vec![task_id],
                    NotifyCallback::ResumeNode {
                        node_execution_id: exec.uuid,
                    },
                    deadline,
                )
                .await?;
            Ok(ready.into_iter().map(WorkItem::Callback).collect())
        }
        StepResponse::Children(request) => children::launch(ctx, exec, request).await,
        StepResponse::Barrier { group_id } => {
            ctx.node_executions
                .save_executable_response(
                    exec.uuid,
                    &ExecutableResponse::Async {
                        correlation_ids: vec![barrier::correlation_id(&group_id, exec.uuid)],
                    },
                )
                .await?;
            barrier::drop_in(ctx, exec, &group_id, BarrierArrival::Reached).await
        }
    }
}

/// A suspended node's correlation ids have all been published (or timed
/// out). Synthesized timeouts are indistinguishable from completions here:
/// both flow into the adviser chain as a step result.
pub(crate) async fn resume_node(
    ctx: &Arc<EngineContext>,
    id: Uuid,
    results: HashMap<String, NotifyPayload>,
) -> Result<Vec<WorkItem>> {
    let exec = ctx.node_executions.get(id).await?;
    if exec.status != ExecutionStatus::Running {
        debug!(
            node_execution_id = %id,
            status = %exec.status,
            "Resume for non-running node, ignoring"
        );
        return Ok(Vec::new());
    }

    if !results.is_empty() && results.values().all(NotifyPayload::is_timeout) {
        let result = StepResult::expired(FailureInfo::timeout(format!(
            "step '{}' timed out waiting for async results",
            exec.node.identifier
        )));
        return Ok(vec![WorkItem::ProcessResult {
            node_execution_id: id,
            result,
        }]);
    }

    let handler = ctx.registry.resolve(&exec.node.step_type)?;
    let result = handler
        .handle_async_response(
            StepContext {
                ambiance: &exec.ambiance,
                node: &exec.node,
                outputs: &ctx.outputs,
            },
            results,
        )
        .await;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            return Ok(vec![WorkItem::end(
                id,
                ExecutionStatus::Errored,
                Some(FailureInfo::new(FailureCategory::Infrastructure, e.to_string())),
            )]);
        }
    };

    Ok(vec![WorkItem::ProcessResult {
        node_execution_id: id,
        result,
    }])
}

/// Drive a node execution to a terminal status, release anything it holds,
/// and notify the parent through the correlator exactly once.
pub(crate) async fn end_node(
    ctx: &Arc<EngineContext>,
    id: Uuid,
    status: ExecutionStatus,
    failure: Option<FailureInfo>,
    notify_parent: bool,
) -> Result<Vec<WorkItem>> {
    let exec = ctx.node_executions.get(id).await?;
    if exec.is_terminal() {
        debug!(node_execution_id = %id, status = %exec.status, "Already terminal, ignoring");
        return Ok(Vec::new());
    }

    if !ctx.transition(&exec, status).await? {
        warn!(node_execution_id = %id, to = %status, "Lost terminal transition race");
        return Ok(Vec::new());
    }

    if let Some(failure) = &failure {
        ctx.node_executions.save_failure(id, failure).await?;
    }

    info!(
        node_execution_id = %id,
        identifier = %exec.node.identifier,
        status = %status,
        "Node execution ended"
    );

    let mut items = Vec::new();

    // A failed node that already dropped into a barrier takes the whole
    // group down as errored; a skipped branch must still report arrival.
    if status.is_broken() {
        items.extend(barrier::release_for_failed(ctx, &exec).await?);
    } else if status == ExecutionStatus::Skipped {
        items.extend(barrier::report_skip(ctx, &exec).await?);
    }

    if notify_parent {
        let payload = NotifyPayload::success(serde_json::json!({ "status": status.as_str() }));
        let ready = ctx.correlator.publish(&id.to_string(), payload).await?;
        items.extend(ready.into_iter().map(WorkItem::Callback));
    }

    if exec.parent_id.is_none() {
        ctx.emit(Event::PlanConcluded {
            plan_execution_id: exec.ambiance.plan_execution_id,
            status,
        });
    }

    Ok(items)
}

/// Pull the completed child's status out of the notify payload, falling
/// back to the stored execution row.
pub(crate) async fn child_status_from(
    ctx: &EngineContext,
    child_id: Uuid,
    results: &HashMap<String, NotifyPayload>,
) -> Result<ExecutionStatus> {
    if let Some(payload) = results.get(&child_id.to_string()) {
        if let Some(status) = payload
            .data
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(ExecutionStatus::parse)
        {
            return Ok(status);
        }
    }
    Ok(ctx.node_executions.get(child_id).await?.status)
}
