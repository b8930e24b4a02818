//! Engine event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use windlass_core::{BarrierState, ExecutionStatus, InterruptType};

/// Envelope wrapping all events with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Everything the engine announces while driving plan executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "node.status_changed")]
    NodeStatusChanged {
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        from_status: ExecutionStatus,
        to_status: ExecutionStatus,
    },

    #[serde(rename = "node.retry_scheduled")]
    NodeRetryScheduled {
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        retry_execution_id: Uuid,
        retry_index: u32,
    },

    #[serde(rename = "interrupt.registered")]
    InterruptRegistered {
        interrupt_id: Uuid,
        plan_execution_id: Uuid,
        interrupt_type: InterruptType,
    },

    #[serde(rename = "interrupt.processed")]
    InterruptProcessed {
        interrupt_id: Uuid,
        plan_execution_id: Uuid,
        interrupt_type: InterruptType,
        success: bool,
    },

    #[serde(rename = "barrier.state_changed")]
    BarrierStateChanged {
        plan_execution_id: Uuid,
        group_id: String,
        state: BarrierState,
    },

    #[serde(rename = "task.dispatched")]
    TaskDispatched {
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        task_id: String,
    },

    #[serde(rename = "plan.concluded")]
    PlanConcluded {
        plan_execution_id: Uuid,
        status: ExecutionStatus,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        plan_execution_id: Option<Uuid>,
    },
}

impl Event {
    /// Plan execution the event belongs to, if any.
    pub fn plan_execution_id(&self) -> Option<Uuid> {
        match self {
            Event::NodeStatusChanged {
                plan_execution_id, ..
            }
            | Event::NodeRetryScheduled {
                plan_execution_id, ..
            }
            | Event::InterruptRegistered {
                plan_execution_id, ..
            }
            | Event::InterruptProcessed {
                plan_execution_id, ..
            }
            | Event::BarrierStateChanged {
                plan_execution_id, ..
            }
            | Event::TaskDispatched {
                plan_execution_id, ..
            }
            | Event::PlanConcluded {
                plan_execution_id, ..
            } => Some(*plan_execution_id),
            Event::Error {
                plan_execution_id, ..
            } => *plan_execution_id,
        }
    }
}
