//! Persisted entities: actions, steps and executions.

mod action;
mod execution;
mod step;

pub use action::{Action, TriggerSpec, TriggerType};
pub use execution::{
    ActionExecution, ExecutionReport, ExecutionStatus, StepResult, StepStatus, TriggeredBy,
};
pub use step::{Step, StepType};
