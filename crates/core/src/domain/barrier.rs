//! Cross-branch rendezvous points.
//!
//! A barrier instance stands until every expected position has reported an
//! arrival. Positions are enumerated up front from the static plan, so a
//! skipped branch must report a `Skipped` arrival rather than stay silent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    #[default]
    Standing,
    Down,
    TimedOut,
    Errored,
}

impl BarrierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standing => "standing",
            Self::Down => "down",
            Self::TimedOut => "timed_out",
            Self::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standing" => Some(Self::Standing),
            "down" => Some(Self::Down),
            "timed_out" => Some(Self::TimedOut),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierArrival {
    Reached,
    Skipped,
}

/// One branch expected at the barrier. `runtime_id` is the node execution
/// holding the position once it arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierPosition {
    pub position_id: String,
    pub runtime_id: Option<Uuid>,
    pub arrival: Option<BarrierArrival>,
}

impl BarrierPosition {
    pub fn expected(position_id: impl Into<String>) -> Self {
        Self {
            position_id: position_id.into(),
            runtime_id: None,
            arrival: None,
        }
    }

    pub fn has_arrived(&self) -> bool {
        self.arrival.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierInstance {
    pub uuid: Uuid,
    pub identifier: String,
    pub group_id: String,
    pub plan_execution_id: Uuid,
    pub state: BarrierState,
    pub expires_at: DateTime<Utc>,
    pub positions: Vec<BarrierPosition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BarrierInstance {
    pub fn new(
        identifier: impl Into<String>,
        group_id: impl Into<String>,
        plan_execution_id: Uuid,
        expires_at: DateTime<Utc>,
        positions: Vec<BarrierPosition>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            identifier: identifier.into(),
            group_id: group_id.into(),
            plan_execution_id,
            state: BarrierState::Standing,
            expires_at,
            positions,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn all_arrived(&self) -> bool {
        !self.positions.is_empty() && self.positions.iter().all(BarrierPosition::has_arrived)
    }

    pub fn position_mut(&mut self, position_id: &str) -> Option<&mut BarrierPosition> {
        self.positions
            .iter_mut()
            .find(|p| p.position_id == position_id)
    }

    /// Node executions parked on this barrier (skipped branches never wait).
    pub fn waiting_runtime_ids(&self) -> Vec<Uuid> {
        self.positions
            .iter()
            .filter(|p| matches!(p.arrival, Some(BarrierArrival::Reached)))
            .filter_map(|p| p.runtime_id)
            .collect()
    }
}
