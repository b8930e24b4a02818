//! Bounded-concurrency fan-out bookkeeping.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::status::ExecutionStatus;

/// Created once when a strategy step fans out; every child completion
/// advances it through a single atomic conditional update keyed on the
/// current cursor value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentChildInstance {
    pub parent_node_execution_id: Uuid,
    pub plan_execution_id: Uuid,
    /// Ordered launch plan; indices below `cursor` have been launched.
    pub children_node_execution_ids: Vec<Uuid>,
    pub cursor: usize,
    pub child_statuses: Vec<ExecutionStatus>,
    pub max_concurrency: usize,
    pub proceed_if_failed: bool,
}

impl ConcurrentChildInstance {
    pub fn new(
        parent_node_execution_id: Uuid,
        plan_execution_id: Uuid,
        children_node_execution_ids: Vec<Uuid>,
        max_concurrency: usize,
        proceed_if_failed: bool,
    ) -> Self {
        let cursor = max_concurrency
            .max(1)
            .min(children_node_execution_ids.len());
        Self {
            parent_node_execution_id,
            plan_execution_id,
            children_node_execution_ids,
            cursor,
            child_statuses: Vec::new(),
            max_concurrency: max_concurrency.max(1),
            proceed_if_failed,
        }
    }

    /// Children started immediately at launch.
    pub fn initial_batch(&self) -> &[Uuid] {
        &self.children_node_execution_ids[..self.cursor]
    }

    pub fn all_completed(&self) -> bool {
        self.child_statuses.len() == self.children_node_execution_ids.len()
    }

    /// Next unlaunched child, if any.
    pub fn next_child(&self) -> Option<Uuid> {
        self.children_node_execution_ids.get(self.cursor).copied()
    }

    pub fn any_broken(&self) -> bool {
        self.child_statuses.iter().any(ExecutionStatus::is_broken)
    }

    /// Combined status for the strategy node once every child has reported.
    pub fn aggregate_status(&self) -> ExecutionStatus {
        if self.child_statuses.iter().any(|s| *s == ExecutionStatus::Aborted) {
            ExecutionStatus::Aborted
        } else if self.child_statuses.iter().any(|s| *s == ExecutionStatus::Errored) {
            ExecutionStatus::Errored
        } else if self.child_statuses.iter().any(|s| *s == ExecutionStatus::Expired) {
            ExecutionStatus::Expired
        } else if self.child_statuses.iter().any(|s| *s == ExecutionStatus::Failed) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(n: usize, max_concurrency: usize) -> ConcurrentChildInstance {
        ConcurrentChildInstance::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            (0..n).map(|_| Uuid::new_v4()).collect(),
            max_concurrency,
            true,
        )
    }

    #[test]
    fn test_initial_cursor_is_bounded() {
        assert_eq!(instance(5, 2).cursor, 2);
        assert_eq!(instance(2, 8).cursor, 2);
        assert_eq!(instance(3, 0).cursor, 1);
    }

    #[test]
    fn test_initial_batch_len() {
        let inst = instance(5, 2);
        assert_eq!(inst.initial_batch().len(), 2);
        assert_eq!(inst.next_child(), Some(inst.children_node_execution_ids[2]));
    }

    #[test]
    fn test_aggregate_prefers_worst() {
        let mut inst = instance(3, 3);
        inst.child_statuses = vec![
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Succeeded,
        ];
        assert!(inst.all_completed());
        assert_eq!(inst.aggregate_status(), ExecutionStatus::Failed);

        inst.child_statuses[2] = ExecutionStatus::Aborted;
        assert_eq!(inst.aggregate_status(), ExecutionStatus::Aborted);
    }

    #[test]
    fn test_skipped_children_do_not_break_aggregate() {
        let mut inst = instance(2, 2);
        inst.child_statuses = vec![ExecutionStatus::Succeeded, ExecutionStatus::Skipped];
        assert_eq!(inst.aggregate_status(), ExecutionStatus::Succeeded);
        assert!(!inst.any_broken());
    }
}
