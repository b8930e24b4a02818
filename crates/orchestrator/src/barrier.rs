//! Barrier synchronizer.
//!
//! Named rendezvous points across parallel branches. Positions are
//! enumerated up front from the static plan, so a skipped branch reports a
//! skip arrival rather than staying silent — otherwise the barrier could
//! never resolve. Arrivals are serialized by the group's advisory lock;
//! the Standing -> Down flip is a one-shot conditional update.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use events::Event;
use windlass_core::{
    BarrierArrival, BarrierInstance, BarrierPosition, BarrierState, ExecutionStatus,
    FailureCategory, FailureInfo, NodeExecution,
};

use crate::context::EngineContext;
use crate::engine::WorkItem;
use crate::error::Result;
use crate::steps::StepResult;
use crate::wait_notify::{NotifyCallback, NotifyPayload, PayloadKind};

/// Definition of one barrier for a plan execution.
#[derive(Debug, Clone)]
pub struct BarrierSpec {
    pub identifier: String,
    pub group_id: String,
    /// Plan-node identifiers expected to arrive.
    pub position_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub(crate) fn correlation_id(group_id: &str, runtime_id: Uuid) -> String {
    format!("barrier::{group_id}::{runtime_id}")
}

pub(crate) async fn init_for_plan(
    ctx: &EngineContext,
    plan_execution_id: Uuid,
    specs: Vec<BarrierSpec>,
) -> Result<()> {
    for spec in specs {
        let positions = spec
            .position_ids
            .iter()
            .map(BarrierPosition::expected)
            .collect();
        let instance = BarrierInstance::new(
            spec.identifier,
            spec.group_id,
            plan_execution_id,
            spec.expires_at,
            positions,
        );
        ctx.barriers.create(&instance).await?;
    }
    Ok(())
}

/// Register this node's arrival. If it was the last expected position the
/// barrier comes down and every parked position is released through the
/// correlator.
pub(crate) async fn drop_in(
    ctx: &Arc<EngineContext>,
    exec: &NodeExecution,
    group_id: &str,
    arrival: BarrierArrival,
) -> Result<Vec<WorkItem>> {
    let lock = ctx.lock(&format!("barrier::{group_id}")).await?;
    let outcome = record_arrival(ctx, exec, group_id, arrival).await;
    ctx.unlock(lock).await;
    outcome
}

async fn record_arrival(
    ctx: &Arc<EngineContext>,
    exec: &NodeExecution,
    group_id: &str,
    arrival: BarrierArrival,
) -> Result<Vec<WorkItem>> {
    let plan_execution_id = exec.ambiance.plan_execution_id;
    let Some(mut barrier) = ctx.barriers.find_by_group(plan_execution_id, group_id).await? else {
        return Ok(vec![WorkItem::end(
            exec.uuid,
            ExecutionStatus::Failed,
            Some(FailureInfo::new(
                FailureCategory::Configuration,
                format!("barrier group '{group_id}' not found"),
            )),
        )]);
    };

    // A late arrival after the group already resolved gets the resolved
    // outcome directly instead of parking.
    match barrier.state {
        BarrierState::Standing => {}
        BarrierState::Down => {
            return Ok(vec![WorkItem::ProcessResult {
                node_execution_id: exec.uuid,
                result: StepResult::succeeded(),
            }]);
        }
        BarrierState::TimedOut => {
            return Ok(vec![WorkItem::ProcessResult {
                node_execution_id: exec.uuid,
                result: StepResult::expired(FailureInfo::timeout(format!(
                    "barrier '{group_id}' timed out"
                ))),
            }]);
        }
        BarrierState::Errored => {
            return Ok(vec![WorkItem::ProcessResult {
                node_execution_id: exec.uuid,
                result: StepResult::failed(FailureInfo::business(format!(
                    "barrier '{group_id}' errored"
                ))),
            }]);
        }
    }

    let Some(position) = barrier.position_mut(&exec.node.identifier) else {
        return Ok(vec![WorkItem::end(
            exec.uuid,
            ExecutionStatus::Failed,
            Some(FailureInfo::new(
                FailureCategory::Configuration,
                format!(
                    "'{}' is not an expected position of barrier '{group_id}'",
                    exec.node.identifier
                ),
            )),
        )]);
    };
    position.arrival = Some(arrival);
    position.runtime_id = Some(exec.uuid);
    ctx.barriers.save_positions(barrier.uuid, &barrier.positions).await?;

    info!(
        group_id,
        node_execution_id = %exec.uuid,
        arrival = ?arrival,
        "Barrier arrival recorded"
    );

    let mut items = Vec::new();

    // Reached positions park on the barrier; skipped branches only report.
    if arrival == BarrierArrival::Reached {
        let ready = ctx
            .correlator
            .wait_for(
                vec![correlation_id(group_id, exec.uuid)],
                NotifyCallback::BarrierReleased {
                    node_execution_id: exec.uuid,
                },
                Some(barrier.expires_at),
            )
            .await?;
        items.extend(ready.into_iter().map(WorkItem::Callback));
    }

    if barrier.all_arrived() {
        items.extend(resolve(ctx, &barrier, BarrierState::Down, PayloadKind::Success).await?);
    }

    Ok(items)
}

/// Flip the barrier state once and release every parked position.
async fn resolve(
    ctx: &Arc<EngineContext>,
    barrier: &BarrierInstance,
    to: BarrierState,
    payload_kind: PayloadKind,
) -> Result<Vec<WorkItem>> {
    if !ctx.barriers.update_state(barrier.uuid, BarrierState::Standing, to).await? {
        // Someone else resolved it; releases already happened.
        return Ok(Vec::new());
    }

    info!(group_id = %barrier.group_id, state = ?to, "Barrier resolved");
    ctx.emit(Event::BarrierStateChanged {
        plan_execution_id: barrier.plan_execution_id,
        group_id: barrier.group_id.clone(),
        state: to,
    });

    let payload = match payload_kind {
        PayloadKind::Success => NotifyPayload::success(serde_json::Value::Null),
        PayloadKind::Timeout => NotifyPayload::timeout(),
        PayloadKind::Error => NotifyPayload::error(format!(
            "barrier '{}' errored",
            barrier.group_id
        )),
    };

    let mut items = Vec::new();
    for runtime_id in barrier.waiting_runtime_ids() {
        let ready = ctx
            .correlator
            .publish(&correlation_id(&barrier.group_id, runtime_id), payload.clone())
            .await?;
        items.extend(ready.into_iter().map(WorkItem::Callback));
    }
    Ok(items)
}

/// A parked position resolved; turn the payload into a step result for the
/// adviser chain.
pub(crate) async fn on_released(
    ctx: &Arc<EngineContext>,
    node_execution_id: Uuid,
    results: &HashMap<String, NotifyPayload>,
) -> Result<Vec<WorkItem>> {
    let exec = ctx.node_executions.get(node_execution_id).await?;
    if exec.status != ExecutionStatus::Running {
        return Ok(Vec::new());
    }

    let kind = results
        .values()
        .next()
        .map(|p| p.kind)
        .unwrap_or(PayloadKind::Error);
    let result = match kind {
        PayloadKind::Success => StepResult::succeeded(),
        PayloadKind::Timeout => StepResult::expired(FailureInfo::timeout(
            "barrier expired before all positions arrived",
        )),
        PayloadKind::Error => {
            StepResult::failed(FailureInfo::business("barrier errored by a failed position"))
        }
    };

    Ok(vec![WorkItem::ProcessResult {
        node_execution_id,
        result,
    }])
}

/// A skipped node must still report arrival at any barrier expecting it.
pub(crate) async fn report_skip(
    ctx: &Arc<EngineContext>,
    exec: &NodeExecution,
) -> Result<Vec<WorkItem>> {
    let mut items = Vec::new();
    for barrier in standing_barriers_expecting(ctx, exec).await? {
        items.extend(drop_in(ctx, exec, &barrier.group_id, BarrierArrival::Skipped).await?);
    }
    Ok(items)
}

/// A broken node that already dropped in takes the whole group down as
/// errored; remaining waiters are released with an error result.
pub(crate) async fn release_for_failed(
    ctx: &Arc<EngineContext>,
    exec: &NodeExecution,
) -> Result<Vec<WorkItem>> {
    let standing = ctx.barriers.find_standing_by_plan(exec.ambiance.plan_execution_id).await?;
    let mut items = Vec::new();
    for barrier in standing {
        let held = barrier
            .positions
            .iter()
            .any(|p| p.runtime_id == Some(exec.uuid));
        if !held {
            continue;
        }
        warn!(
            group_id = %barrier.group_id,
            node_execution_id = %exec.uuid,
            "Releasing barrier as errored after position failure"
        );
        let lock = ctx.lock(&format!("barrier::{}", barrier.group_id)).await?;
        let released = resolve(ctx, &barrier, BarrierState::Errored, PayloadKind::Error).await;
        ctx.unlock(lock).await;
        items.extend(released?);
    }
    Ok(items)
}

/// Standing barriers that still expect this node's identifier.
async fn standing_barriers_expecting(
    ctx: &EngineContext,
    exec: &NodeExecution,
) -> Result<Vec<BarrierInstance>> {
    let standing = ctx.barriers.find_standing_by_plan(exec.ambiance.plan_execution_id).await?;
    Ok(standing
        .into_iter()
        .filter(|b| {
            b.positions
                .iter()
                .any(|p| p.position_id == exec.node.identifier && !p.has_arrived())
        })
        .collect())
}

/// Monitor pass: time out barriers whose deadline passed before all
/// positions arrived.
pub(crate) async fn sweep_expired(
    ctx: &Arc<EngineContext>,
    now: DateTime<Utc>,
) -> Result<Vec<WorkItem>> {
    let mut items = Vec::new();
    for barrier in ctx.barriers.find_expired(now).await? {
        let lock = ctx.lock(&format!("barrier::{}", barrier.group_id)).await?;
        let released = resolve(ctx, &barrier, BarrierState::TimedOut, PayloadKind::Timeout).await;
        ctx.unlock(lock).await;
        items.extend(released?);
    }
    Ok(items)
}
