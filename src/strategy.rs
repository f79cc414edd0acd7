//! Groups the flat action plan into an executable strategy.
//!
//! Every event closes the run of actions listed before it and decides how
//! that run is carried out. Compilation, validation and reference gathering
//! are separate passes so each failure maps to its own launcher return code.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error};

use crate::error::PlanError;
use crate::model::{ExecutionMode, PlanEntry, PlanModel};
use crate::types::{PlanFileRef, StepId};

/// An event together with the actions it waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub event_id: StepId,
    pub required_mode: ExecutionMode,
    pub member_action_ids: Vec<StepId>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.member_action_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_action_ids.is_empty()
    }
}

/// Groups in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strategy {
    groups: Vec<Group>,
    max_run_len: usize,
    max_sequential_len: usize,
}

impl Strategy {
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, event_id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.event_id.as_str() == event_id)
    }

    /// Longest run of actions closed by a single event.
    pub fn max_run_len(&self) -> usize {
        self.max_run_len
    }

    /// Longest sequential group; the sequential worker pool is sized by it.
    pub fn max_sequential_len(&self) -> usize {
        self.max_sequential_len
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All member action ids, in plan order.
    pub fn action_ids(&self) -> impl Iterator<Item = &StepId> {
        self.groups.iter().flat_map(|g| g.member_action_ids.iter())
    }
}

/// Walks the plan once and closes a group at every event.
pub fn compile(plan: &PlanModel) -> Result<Strategy, PlanError> {
    let mut strategy = Strategy::default();
    let mut pending: Vec<StepId> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for step in &plan.steps {
        if !seen.insert(step.id.as_str()) {
            error!(step = %step.id, "step id is used more than once");
            return Err(PlanError::DuplicateStepId(step.id.clone()));
        }

        match &step.entry {
            PlanEntry::Action(_) => {
                pending.push(step.id.clone());
                strategy.max_run_len = strategy.max_run_len.max(pending.len());
            }
            PlanEntry::Event(event) => {
                let members = std::mem::take(&mut pending);
                if event.required_mode == ExecutionMode::Sequential {
                    strategy.max_sequential_len = strategy.max_sequential_len.max(members.len());
                }
                strategy.groups.push(Group {
                    event_id: step.id.clone(),
                    required_mode: event.required_mode,
                    member_action_ids: members,
                });
            }
            PlanEntry::Unrecognized => {
                error!(step = %step.id, "wrong <action_type> found");
                return Err(PlanError::MalformedPlanEntry(step.id.clone()));
            }
        }
    }

    debug!(max_run_len = strategy.max_run_len, "maximum number of actions per event");

    if !pending.is_empty() {
        error!("<action_plan> must be ended with an event");
        return Err(PlanError::UnterminatedPlan(pending));
    }

    Ok(strategy)
}

/// Checks that every action's launch method matches its closing event.
/// The first mismatch aborts the check.
pub fn validate_grouping(strategy: &Strategy, plan: &PlanModel) -> Result<(), PlanError> {
    debug!("validating the grouping of actions and launching methods");

    for group in strategy.groups() {
        for action_id in &group.member_action_ids {
            let action = plan
                .action(action_id.as_str())
                .ok_or_else(|| PlanError::UnknownAction {
                    group: group.event_id.clone(),
                    action_id: action_id.clone(),
                })?;

            if action.execution_mode != group.required_mode {
                error!(
                    event = %group.event_id,
                    action = %action_id,
                    expected = %group.required_mode,
                    found = %action.execution_mode,
                    "action is associated with the wrong launching method"
                );
                return Err(PlanError::ActionModeMismatch {
                    group: group.event_id.clone(),
                    action_id: action_id.clone(),
                    expected: group.required_mode,
                    found: action.execution_mode,
                });
            }
        }
    }

    Ok(())
}

/// Resolves the plan file reference of every action in the strategy.
pub fn gather_plan_refs(
    strategy: &Strategy,
    plan: &PlanModel,
) -> Result<HashMap<StepId, PlanFileRef>, PlanError> {
    debug!("gathering action plan file references");

    let mut refs = HashMap::new();
    for action_id in strategy.action_ids() {
        let plan_ref = plan
            .action(action_id.as_str())
            .and_then(|action| action.plan_ref.clone())
            .ok_or_else(|| {
                error!(action = %action_id, "error in gathering action plan file references");
                PlanError::MissingPlanReference(action_id.clone())
            })?;
        refs.insert(action_id.clone(), plan_ref);
    }

    debug!(count = refs.len(), "action plan file references are gathered");
    Ok(refs)
}
