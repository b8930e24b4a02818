//! End-to-end engine scenarios driven against a real (file-backed) store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use db::{create_pool, run_migrations, BarrierRepository, ChildrenRepository, InterruptRepository};
use orchestrator::{
    BarrierSpec, ChildSpec, ChildrenRequest, EngineConfig, InterruptPackage, NotifyPayload,
    OrchestrationEngine, StepContext, StepHandler, StepRegistry, StepResponse, StepResult,
    TaskDispatcher, TaskRequest,
};
use windlass_core::{
    AdviserKind, AdviserSpec, BarrierState, ExecutionStatus, FacilitatorMode, FailureCategory,
    FailureInfo, InterruptConfig, InterruptState, InterruptType, NodeExecution, Plan, PlanNode,
    RepairAction, RetryPolicy, SkipCondition, StrategyMetadata,
};

// ---------------------------------------------------------------- handlers

/// Synchronous step; fails when its parameters say so, or when its own
/// identifier appears in the `fail` list its parent copied down.
struct SyncStep {
    executions: AtomicUsize,
}

#[async_trait]
impl StepHandler for SyncStep {
    async fn execute(&self, ctx: StepContext<'_>) -> orchestrator::Result<StepResponse> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let failed_by_list = ctx
            .node
            .parameters
            .get("fail")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .any(|v| v.as_str() == Some(ctx.node.identifier.as_str()))
            })
            .unwrap_or(false);
        let failed = failed_by_list
            || ctx.node.parameters.get("outcome").and_then(|v| v.as_str()) == Some("fail");

        if failed {
            Ok(StepResponse::Completed(StepResult::failed(
                FailureInfo::business("step reported failure"),
            )))
        } else {
            let outcome_name = format!("{}_rc", ctx.node.identifier);
            Ok(StepResponse::Completed(
                StepResult::succeeded().with_outcome(outcome_name, serde_json::json!(0)),
            ))
        }
    }
}

/// Suspends on a per-execution correlation id until the test publishes it.
struct AsyncStep {
    executions: AtomicUsize,
}

fn work_correlation_id(exec_id: Uuid) -> String {
    format!("work::{exec_id}")
}

#[async_trait]
impl StepHandler for AsyncStep {
    async fn execute(&self, ctx: StepContext<'_>) -> orchestrator::Result<StepResponse> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let exec_id = ctx.ambiance.node_runtime_id()?;
        Ok(StepResponse::AsyncAwait {
            correlation_ids: vec![work_correlation_id(exec_id)],
            timeout_ms: ctx.node.timeout_ms,
        })
    }

    async fn handle_async_response(
        &self,
        _ctx: StepContext<'_>,
        responses: HashMap<String, NotifyPayload>,
    ) -> orchestrator::Result<StepResult> {
        let failed = responses
            .values()
            .any(|p| p.data.get("outcome").and_then(|v| v.as_str()) == Some("fail"));
        if failed {
            Ok(StepResult::failed(FailureInfo::business("worker reported failure")))
        } else {
            Ok(StepResult::succeeded())
        }
    }
}

/// Ships a task to the (mock) remote worker.
struct TaskStep;

#[async_trait]
impl StepHandler for TaskStep {
    async fn execute(&self, ctx: StepContext<'_>) -> orchestrator::Result<StepResponse> {
        Ok(StepResponse::Task(TaskRequest {
            task_type: "integration".to_string(),
            payload: ctx.node.parameters.clone(),
            timeout_ms: ctx.node.timeout_ms,
        }))
    }

    async fn handle_async_response(
        &self,
        _ctx: StepContext<'_>,
        _responses: HashMap<String, NotifyPayload>,
    ) -> orchestrator::Result<StepResult> {
        Ok(StepResult::succeeded())
    }
}

/// Fails until it has been executed `succeed_after` times.
struct FlakyStep {
    attempts: AtomicUsize,
}

#[async_trait]
impl StepHandler for FlakyStep {
    async fn execute(&self, _ctx: StepContext<'_>) -> orchestrator::Result<StepResponse> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Ok(StepResponse::Completed(StepResult::failed(
                FailureInfo::business("transient step failure"),
            )))
        } else {
            Ok(StepResponse::Completed(StepResult::succeeded()))
        }
    }
}

/// Strategy step: fans out children described by its parameters.
struct FanoutStep;

#[async_trait]
impl StepHandler for FanoutStep {
    async fn execute(&self, ctx: StepContext<'_>) -> orchestrator::Result<StepResponse> {
        let params = &ctx.node.parameters;
        let count = params.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let child_type = params
            .get("child_type")
            .and_then(|v| v.as_str())
            .unwrap_or("work");
        let max_concurrency =
            params.get("max_concurrency").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let proceed_if_failed = params
            .get("proceed_if_failed")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mode = match child_type {
            "wait" => FacilitatorMode::Async,
            "remote" => FacilitatorMode::Task,
            _ => FacilitatorMode::Sync,
        };

        let children = (0..count)
            .map(|i| {
                let mut node = PlanNode::new(format!("iter_{i}"), child_type, mode)
                    .with_parameters(serde_json::json!({
                        "fail": params.get("fail").cloned().unwrap_or(serde_json::json!([])),
                        "group": params.get("group").cloned().unwrap_or(serde_json::Value::Null),
                    }));
                if params.get("retry_children").and_then(|v| v.as_bool()) == Some(true) {
                    node = node.with_adviser(AdviserSpec::new(
                        AdviserKind::Retry {
                            policy: RetryPolicy {
                                max_attempts: 2,
                                backoff_base_ms: 0,
                            },
                        },
                        vec![ExecutionStatus::Failed],
                    ));
                }
                ChildSpec {
                    node,
                    strategy_metadata: Some(StrategyMetadata {
                        current_iteration: i,
                        total_iterations: count,
                    }),
                }
            })
            .collect();

        Ok(StepResponse::Children(ChildrenRequest {
            children,
            max_concurrency,
            proceed_if_failed,
        }))
    }
}

/// Arrives at the barrier named in its parameters.
struct BarrierStep;

#[async_trait]
impl StepHandler for BarrierStep {
    async fn execute(&self, ctx: StepContext<'_>) -> orchestrator::Result<StepResponse> {
        let group_id = ctx
            .node
            .parameters
            .get("group")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();
        Ok(StepResponse::Barrier { group_id })
    }
}

// ------------------------------------------------------------- dispatcher

#[derive(Default)]
struct MockDispatcher {
    submitted: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

#[async_trait]
impl TaskDispatcher for MockDispatcher {
    async fn submit(&self, _request: &TaskRequest) -> orchestrator::Result<String> {
        let task_id = format!("task-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.submitted.lock().unwrap().push(task_id.clone());
        Ok(task_id)
    }

    async fn request_cancel(&self, task_id: &str) -> orchestrator::Result<()> {
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------- fixture

struct Harness {
    engine: OrchestrationEngine,
    dispatcher: Arc<MockDispatcher>,
    pool: sqlx::SqlitePool,
    sync_executions: Arc<SyncStep>,
    async_executions: Arc<AsyncStep>,
    _db_file: tempfile::NamedTempFile,
}

async fn harness(plan: Plan) -> Harness {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", db_file.path().display());
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let sync_step = Arc::new(SyncStep {
        executions: AtomicUsize::new(0),
    });
    let async_step = Arc::new(AsyncStep {
        executions: AtomicUsize::new(0),
    });
    let registry = StepRegistry::builder()
        .register("work", sync_step.clone())
        .register("wait", async_step.clone())
        .register("remote", Arc::new(TaskStep))
        .register("flaky", Arc::new(FlakyStep {
            attempts: AtomicUsize::new(0),
        }))
        .register("fanout", Arc::new(FanoutStep))
        .register("rendezvous", Arc::new(BarrierStep))
        .build();

    let dispatcher = Arc::new(MockDispatcher::default());
    let config = EngineConfig::new()
        .with_lock_wait(std::time::Duration::from_millis(500))
        .with_abort_grace_ms(60_000);

    let engine = OrchestrationEngine::builder(pool.clone(), Arc::new(plan))
        .with_registry(registry)
        .with_dispatcher(dispatcher.clone())
        .with_config(config)
        .build();

    Harness {
        engine,
        dispatcher,
        pool,
        sync_executions: sync_step,
        async_executions: async_step,
        _db_file: db_file,
    }
}

impl Harness {
    async fn children_of(&self, plan_id: Uuid, parent: Uuid) -> Vec<NodeExecution> {
        let mut children: Vec<NodeExecution> = self
            .engine
            .plan_executions(plan_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.parent_id == Some(parent))
            .collect();
        children.sort_by(|a, b| a.node.identifier.cmp(&b.node.identifier));
        children
    }

    async fn running_children(&self, plan_id: Uuid, parent: Uuid) -> usize {
        self.children_of(plan_id, parent)
            .await
            .iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .count()
    }
}

fn fanout_plan(params: serde_json::Value) -> Plan {
    let root = PlanNode::new("strategy", "fanout", FacilitatorMode::Children)
        .with_parameters(params);
    Plan::new(root)
}

// ----------------------------------------------------------------- tests

#[tokio::test]
async fn scenario_a_bounded_concurrency_happy_path() {
    let plan_id = Uuid::new_v4();
    let h = harness(fanout_plan(serde_json::json!({
        "count": 5,
        "child_type": "wait",
        "max_concurrency": 2,
    })))
    .await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    // Exactly max_concurrency children run at any time.
    assert_eq!(h.running_children(plan_id, root).await, 2);

    loop {
        let children = h.children_of(plan_id, root).await;
        let Some(running) = children
            .iter()
            .find(|e| e.status == ExecutionStatus::Running)
        else {
            break;
        };
        h.engine
            .publish(
                &work_correlation_id(running.uuid),
                NotifyPayload::success(serde_json::json!({})),
            )
            .await
            .unwrap();

        let still_open = h
            .children_of(plan_id, root)
            .await
            .iter()
            .any(|e| !e.status.is_terminal());
        if still_open {
            assert!(h.running_children(plan_id, root).await <= 2);
        }
    }

    let children = h.children_of(plan_id, root).await;
    assert_eq!(children.len(), 5);
    assert!(children
        .iter()
        .all(|e| e.status == ExecutionStatus::Succeeded));

    let root_exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(root_exec.status, ExecutionStatus::Succeeded);

    let (instance, _) = ChildrenRepository::new(h.pool.clone())
        .find_by_parent(root)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.cursor, 5);
    assert_eq!(instance.child_statuses.len(), 5);
    assert_eq!(h.async_executions.executions.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn scenario_b_fail_fast_skips_unlaunched_children() {
    let plan_id = Uuid::new_v4();
    let h = harness(fanout_plan(serde_json::json!({
        "count": 5,
        "child_type": "work",
        "max_concurrency": 2,
        "proceed_if_failed": false,
        "fail": ["iter_1"],
    })))
    .await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    let children = h.children_of(plan_id, root).await;
    let by_id: HashMap<&str, ExecutionStatus> = children
        .iter()
        .map(|e| (e.node.identifier.as_str(), e.status))
        .collect();

    assert_eq!(by_id["iter_0"], ExecutionStatus::Succeeded);
    assert_eq!(by_id["iter_1"], ExecutionStatus::Failed);
    assert_eq!(by_id["iter_2"], ExecutionStatus::Succeeded);
    // Never launched: skipped by fail-fast.
    assert_eq!(by_id["iter_3"], ExecutionStatus::Skipped);
    assert_eq!(by_id["iter_4"], ExecutionStatus::Skipped);

    let root_exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(root_exec.status, ExecutionStatus::Failed);

    let (instance, _) = ChildrenRepository::new(h.pool.clone())
        .find_by_parent(root)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.cursor, 5);
    // iter_3 / iter_4 never executed a handler.
    assert_eq!(h.sync_executions.executions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn barrier_comes_down_when_all_positions_arrive() {
    let plan_id = Uuid::new_v4();
    let h = harness(fanout_plan(serde_json::json!({
        "count": 2,
        "child_type": "rendezvous",
        "max_concurrency": 2,
        "group": "pre-deploy",
    })))
    .await;

    h.engine
        .create_barriers(
            plan_id,
            vec![BarrierSpec {
                identifier: "pre-deploy".to_string(),
                group_id: "pre-deploy".to_string(),
                position_ids: vec!["iter_0".to_string(), "iter_1".to_string()],
                expires_at: Utc::now() + Duration::minutes(5),
            }],
        )
        .await
        .unwrap();

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    let children = h.children_of(plan_id, root).await;
    assert!(children
        .iter()
        .all(|e| e.status == ExecutionStatus::Succeeded));

    let barrier = BarrierRepository::new(h.pool.clone())
        .find_by_group(plan_id, "pre-deploy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(barrier.state, BarrierState::Down);
}

#[tokio::test]
async fn scenario_c_barrier_timeout_releases_waiters() {
    let plan_id = Uuid::new_v4();
    let h = harness(fanout_plan(serde_json::json!({
        "count": 3,
        "child_type": "rendezvous",
        "max_concurrency": 2,
        "group": "g1",
    })))
    .await;

    h.engine
        .create_barriers(
            plan_id,
            vec![BarrierSpec {
                identifier: "g1".to_string(),
                group_id: "g1".to_string(),
                position_ids: vec![
                    "iter_0".to_string(),
                    "iter_1".to_string(),
                    "iter_2".to_string(),
                ],
                expires_at: Utc::now() + Duration::milliseconds(100),
            }],
        )
        .await
        .unwrap();

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    // Two positions arrived and parked; the third is still queued.
    assert_eq!(h.running_children(plan_id, root).await, 2);

    // Deadline passes before the last position arrives.
    h.engine.sweep(Utc::now() + Duration::minutes(1)).await.unwrap();

    let barrier = BarrierRepository::new(h.pool.clone())
        .find_by_group(plan_id, "g1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(barrier.state, BarrierState::TimedOut);

    let children = h.children_of(plan_id, root).await;
    // Early waiters released with a timeout result; the late arrival saw
    // the already-timed-out barrier.
    assert!(children
        .iter()
        .all(|e| e.status == ExecutionStatus::Expired));

    let root_exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(root_exec.status, ExecutionStatus::Expired);
}

#[tokio::test]
async fn scenario_d_intervention_timeout_applies_repair_action() {
    let plan_id = Uuid::new_v4();
    let root_node = PlanNode::new("approval", "work", FacilitatorMode::Sync)
        .with_parameters(serde_json::json!({"outcome": "fail"}))
        .with_adviser(AdviserSpec::new(
            AdviserKind::Intervene {
                repair: RepairAction::MarkAsSuccess,
                timeout_ms: 60_000,
            },
            vec![ExecutionStatus::Failed],
        ));
    let h = harness(Plan::new(root_node)).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::InterventionWaiting);
    assert!(exec.intervention.is_some());

    // Before the deadline nothing fires.
    h.engine.sweep(Utc::now()).await.unwrap();
    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::InterventionWaiting);

    // Past the deadline the stored repair action is synthesized.
    h.engine.sweep(Utc::now() + Duration::minutes(2)).await.unwrap();
    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Succeeded);
    assert_eq!(exec.interrupt_history.len(), 1);
    assert_eq!(
        exec.interrupt_history[0].interrupt_type,
        InterruptType::MarkSuccess
    );
}

#[tokio::test]
async fn operator_interrupt_beats_intervention_deadline() {
    let plan_id = Uuid::new_v4();
    let root_node = PlanNode::new("approval", "work", FacilitatorMode::Sync)
        .with_parameters(serde_json::json!({"outcome": "fail"}))
        .with_adviser(AdviserSpec::new(
            AdviserKind::Intervene {
                repair: RepairAction::MarkAsSuccess,
                timeout_ms: 3_600_000,
            },
            vec![ExecutionStatus::Failed],
        ));
    let h = harness(Plan::new(root_node)).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    h.engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::MarkFailed,
            plan_execution_id: plan_id,
            node_execution_id: Some(root),
            config: InterruptConfig::operator("alice"),
        })
        .await
        .unwrap();

    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);

    // The deadline passing later must not resurrect the node.
    h.engine.sweep(Utc::now() + Duration::hours(2)).await.unwrap();
    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn scenario_e_abort_without_remote_task_is_local() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new("hold", "wait", FacilitatorMode::Async))).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Running
    );

    let interrupt = h
        .engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::Abort,
            plan_execution_id: plan_id,
            node_execution_id: Some(root),
            config: InterruptConfig::operator("ops"),
        })
        .await
        .unwrap();

    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Aborted);
    assert_eq!(exec.interrupt_history.len(), 1);
    // No remote round trip happened.
    assert!(h.dispatcher.cancelled.lock().unwrap().is_empty());

    let stored = InterruptRepository::new(h.pool.clone())
        .get(interrupt.uuid)
        .await
        .unwrap();
    assert_eq!(stored.state, InterruptState::ProcessedSuccessfully);
}

#[tokio::test]
async fn task_abort_waits_for_worker_acknowledgment() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new("provision", "remote", FacilitatorMode::Task))).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();
    assert_eq!(h.dispatcher.submitted.lock().unwrap().as_slice(), ["task-1"]);

    h.engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::Abort,
            plan_execution_id: plan_id,
            node_execution_id: Some(root),
            config: InterruptConfig::operator("ops"),
        })
        .await
        .unwrap();

    // Cancel requested, but the node holds until the worker acknowledges.
    assert_eq!(h.dispatcher.cancelled.lock().unwrap().as_slice(), ["task-1"]);
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Discontinuing
    );

    h.engine
        .publish(
            &format!("abort::{root}"),
            NotifyPayload::success(serde_json::json!({"cancelled": true})),
        )
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Aborted
    );
}

#[tokio::test]
async fn task_abort_proceeds_after_grace_period() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new("provision", "remote", FacilitatorMode::Task))).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    h.engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::Abort,
            plan_execution_id: plan_id,
            node_execution_id: Some(root),
            config: InterruptConfig::operator("ops"),
        })
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Discontinuing
    );

    // No acknowledgment ever arrives; the grace deadline forces progress.
    h.engine.sweep(Utc::now() + Duration::hours(1)).await.unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Aborted
    );
}

#[tokio::test]
async fn task_completion_resumes_the_node() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new("provision", "remote", FacilitatorMode::Task))).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Running
    );

    h.engine
        .publish("task-1", NotifyPayload::success(serde_json::json!({"rc": 0})))
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Succeeded
    );
}

#[tokio::test]
async fn task_timeout_surfaces_as_expired() {
    let plan_id = Uuid::new_v4();
    let node = PlanNode::new("provision", "remote", FacilitatorMode::Task).with_timeout_ms(50);
    let h = harness(Plan::new(node)).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    h.engine.sweep(Utc::now() + Duration::minutes(1)).await.unwrap();

    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Expired);
    let failure = exec.failure.unwrap();
    assert_eq!(failure.category, FailureCategory::Timeout);
}

#[tokio::test]
async fn retry_spawns_linked_execution_and_takes_over_slot() {
    let plan_id = Uuid::new_v4();
    let h = harness(fanout_plan(serde_json::json!({
        "count": 1,
        "child_type": "flaky",
        "max_concurrency": 1,
        "retry_children": true,
    })))
    .await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    let root_exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(root_exec.status, ExecutionStatus::Succeeded);

    let mut attempts: Vec<NodeExecution> = h
        .engine
        .plan_executions(plan_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.node.identifier == "iter_0")
        .collect();
    attempts.sort_by_key(|e| e.retry_index);
    assert_eq!(attempts.len(), 2);

    let (first, second) = (&attempts[0], &attempts[1]);
    assert_eq!(first.status, ExecutionStatus::Failed);
    assert_eq!(second.status, ExecutionStatus::Succeeded);
    assert_eq!(second.previous_id, Some(first.uuid));
    assert_eq!(second.retry_index, 1);
    // Identity copy: same semantic node, fresh uuid.
    assert_ne!(second.node.uuid, first.node.uuid);

    let (instance, _) = ChildrenRepository::new(h.pool.clone())
        .find_by_parent(root)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.children_node_execution_ids, vec![second.uuid]);
}

#[tokio::test]
async fn start_is_idempotent_and_terminal_states_are_frozen() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new("hold", "wait", FacilitatorMode::Async))).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    // Redelivered start on a running node is a no-op.
    h.engine.kick(root).await.unwrap();
    h.engine.kick(root).await.unwrap();
    assert_eq!(h.async_executions.executions.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Running
    );

    h.engine
        .publish(
            &work_correlation_id(root),
            NotifyPayload::success(serde_json::json!({})),
        )
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Succeeded
    );

    // Terminal is forever: redelivery does not reopen, interrupts refuse.
    h.engine.kick(root).await.unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Succeeded
    );
    let err = h
        .engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::Abort,
            plan_execution_id: plan_id,
            node_execution_id: Some(root),
            config: InterruptConfig::operator("ops"),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        orchestrator::OrchestratorError::NotInterruptible { .. }
    ));
}

#[tokio::test]
async fn pause_all_gates_facilitation_until_resume() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new("build", "work", FacilitatorMode::Sync))).await;

    h.engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::PauseAll,
            plan_execution_id: plan_id,
            node_execution_id: None,
            config: InterruptConfig::operator("ops"),
        })
        .await
        .unwrap();

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Queued
    );

    h.engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::ResumeAll,
            plan_execution_id: plan_id,
            node_execution_id: None,
            config: InterruptConfig::operator("ops"),
        })
        .await
        .unwrap();
    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Succeeded
    );
}

#[tokio::test]
async fn abort_all_interrupts_every_open_node() {
    let plan_id = Uuid::new_v4();
    let h = harness(fanout_plan(serde_json::json!({
        "count": 3,
        "child_type": "wait",
        "max_concurrency": 3,
    })))
    .await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();
    assert_eq!(h.running_children(plan_id, root).await, 3);

    h.engine
        .register_interrupt(InterruptPackage {
            interrupt_type: InterruptType::AbortAll,
            plan_execution_id: plan_id,
            node_execution_id: None,
            config: InterruptConfig::operator("ops").with_reason("release rollback"),
        })
        .await
        .unwrap();

    for exec in h.engine.plan_executions(plan_id).await.unwrap() {
        assert_eq!(exec.status, ExecutionStatus::Aborted);
    }
}

#[tokio::test]
async fn skip_condition_short_circuits_node() {
    let plan_id = Uuid::new_v4();
    let node = PlanNode::new("optional", "work", FacilitatorMode::Sync)
        .with_skip_condition(SkipCondition::new("always", vec![]));
    let h = harness(Plan::new(node)).await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    assert_eq!(
        h.engine.node_execution(root).await.unwrap().status,
        ExecutionStatus::Skipped
    );
    assert_eq!(h.sync_executions.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_step_type_fails_without_retry() {
    let plan_id = Uuid::new_v4();
    let h = harness(Plan::new(PlanNode::new(
        "mystery",
        "unregistered",
        FacilitatorMode::Sync,
    )))
    .await;

    let root = h
        .engine
        .start_plan_execution(plan_id, "acct", "org", "proj")
        .await
        .unwrap();

    let exec = h.engine.node_execution(root).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(
        exec.failure.unwrap().category,
        FailureCategory::Configuration
    );
}
