//! Windlass orchestration engine.
//!
//! Drives user-defined pipelines — directed graphs of steps — through a
//! persisted node-execution state machine: bounded-concurrency fan-out for
//! loop/matrix strategies, cross-branch barriers, operator interrupts, and
//! a durable wait-notify correlator that resumes work when remote workers
//! or humans complete it.

mod advise;
mod barrier;
mod children;
mod conditions;
mod config;
mod context;
mod engine;
mod error;
mod interrupts;
mod lifecycle;
mod outputs;
mod providers;
mod state_machine;
mod steps;
mod wait_notify;

pub use barrier::BarrierSpec;
pub use conditions::{ConditionEvaluator, ConditionInput};
pub use config::EngineConfig;
pub use engine::{EngineBuilder, OrchestrationEngine};
pub use error::{OrchestratorError, Result};
pub use interrupts::InterruptPackage;
pub use outputs::OutputStore;
pub use providers::{PlanProvider, TaskDispatcher, UnroutableDispatcher};
pub use state_machine::ExecutionStateMachine;
pub use steps::{
    ChildSpec, ChildrenRequest, StepContext, StepHandler, StepRegistry, StepRegistryBuilder,
    StepResponse, StepResult, TaskRequest,
};
pub use wait_notify::{NotifyCallback, NotifyPayload, PayloadKind, WaitNotify};
