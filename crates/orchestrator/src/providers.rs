//! External collaborator seams: the plan supplier and the remote worker
//! dispatch. Concrete transports live outside the engine.

use async_trait::async_trait;
use uuid::Uuid;
use windlass_core::{Plan, PlanNode};

use crate::error::Result;
use crate::steps::TaskRequest;

/// Supplies the static plan graph for a plan execution.
pub trait PlanProvider: Send + Sync {
    fn get_node(&self, id: Uuid) -> Result<PlanNode>;
    fn start_node_id(&self) -> Uuid;
}

impl PlanProvider for Plan {
    fn get_node(&self, id: Uuid) -> Result<PlanNode> {
        Ok(Plan::get_node(self, id)?.clone())
    }

    fn start_node_id(&self) -> Uuid {
        Plan::start_node_id(self)
    }
}

/// Ships task-mode steps to remote workers. Completion flows back through
/// the correlator as a publish against the returned task id.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn submit(&self, request: &TaskRequest) -> Result<String>;

    /// Best-effort; the engine aborts locally after its grace period
    /// whether or not the worker acknowledges.
    async fn request_cancel(&self, task_id: &str) -> Result<()>;
}

/// Default dispatcher for deployments with no remote workers wired up.
/// Task-mode steps fail fast instead of hanging.
pub struct UnroutableDispatcher;

#[async_trait]
impl TaskDispatcher for UnroutableDispatcher {
    async fn submit(&self, request: &TaskRequest) -> Result<String> {
        Err(crate::error::OrchestratorError::TaskDispatch(format!(
            "no task dispatcher configured for task type '{}'",
            request.task_type
        )))
    }

    async fn request_cancel(&self, _task_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windlass_core::FacilitatorMode;

    #[test]
    fn test_plan_is_a_provider() {
        let node = PlanNode::new("start", "shell", FacilitatorMode::Sync);
        let id = node.uuid;
        let plan = Plan::new(node);
        let provider: &dyn PlanProvider = &plan;

        assert_eq!(provider.start_node_id(), id);
        assert_eq!(provider.get_node(id).unwrap().identifier, "start");
        assert!(provider.get_node(Uuid::new_v4()).is_err());
    }
}
