use thiserror::Error;

use crate::model::ExecutionMode;
use crate::types::StepId;

/// Structural problems detected while compiling the plan into a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("step <{0}> is neither an action nor an event")]
    MalformedPlanEntry(StepId),

    #[error("step id <{0}> appears more than once in the action plan")]
    DuplicateStepId(StepId),

    #[error("action plan must end with an event; trailing actions: {}", join_ids(.0))]
    UnterminatedPlan(Vec<StepId>),

    #[error("<{group}> waits for {expected} actions but <{action_id}> is {found}")]
    ActionModeMismatch {
        group: StepId,
        action_id: StepId,
        expected: ExecutionMode,
        found: ExecutionMode,
    },

    #[error("<{group}> refers to <{action_id}> which is not an action of the plan")]
    UnknownAction { group: StepId, action_id: StepId },

    #[error("no plan file reference for action <{0}>")]
    MissingPlanReference(StepId),
}

/// Resource problems that abort the group being launched.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("worker #{index} could not be started: {reason}")]
    WorkerStartFailure { index: usize, reason: String },

    #[error("no launch arguments to spawn <{0}>")]
    MissingLaunchArgs(StepId),

    #[error("no scientific parameters reference for <{0}>")]
    MissingSciParams(StepId),

    #[error("no plan file reference for <{0}>")]
    MissingPlanRef(StepId),

    #[error("worker pool is not running")]
    PoolNotRunning,

    #[error("work queue is closed")]
    QueueClosed,
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
