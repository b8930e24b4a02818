pub mod domain;
pub mod error;

pub use domain::ambiance::{Ambiance, Level, StrategyMetadata};
pub use domain::barrier::{BarrierArrival, BarrierInstance, BarrierPosition, BarrierState};
pub use domain::children::ConcurrentChildInstance;
pub use domain::interrupt::{
    Interrupt, InterruptConfig, InterruptEffect, InterruptState, InterruptType,
};
pub use domain::node_execution::{
    ExecutableResponse, FailureCategory, FailureInfo, InterventionDetails, NodeExecution,
};
pub use domain::outputs::{OutcomeInstance, OutputInstance};
pub use domain::plan::{
    AdviserDecision, AdviserKind, AdviserSpec, FacilitatorMode, Plan, PlanNode, RepairAction,
    RetryPolicy, SkipCondition,
};
pub use domain::status::ExecutionStatus;
pub use error::CoreError;
