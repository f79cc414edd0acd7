//! In-memory action plan as handed over by the plan loader.
//!
//! The plan is an ordered list of steps. Each step is either an action (an
//! executable unit with its own launch method) or an event (a synchronisation
//! point closing the run of actions before it). Launch arguments, scientific
//! parameter references and plan-level variables are separate lookups keyed
//! by step id, mirroring the way the loader produces them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::{PlanFileRef, SciParamsRef, StepId};

/// Plan variable selecting where concurrent batches run (`LOCAL` or a cluster).
pub const EXECUTION_ENVIRONMENT_VAR: &str = "CO_SIM_EXECUTION_ENVIRONMENT";
/// Plan parameter enabling resource usage monitoring.
pub const ENABLE_MONITORING_PARAM: &str = "CO_SIM_ENABLE_MONITORING";
/// Plan parameter enabling the REST app server.
pub const ENABLE_APP_SERVER_PARAM: &str = "CO_SIM_ENABLE_REST_APP_SERVER";

/// How a run of actions has to be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[serde(
        alias = "CO_SIM_SEQUENTIAL_ACTION",
        alias = "CO_SIM_WAIT_FOR_SEQUENTIAL_ACTIONS"
    )]
    Sequential,
    #[serde(
        alias = "CO_SIM_CONCURRENT_ACTION",
        alias = "CO_SIM_WAIT_FOR_CONCURRENT_ACTIONS"
    )]
    Concurrent,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "SEQUENTIAL",
            ExecutionMode::Concurrent => "CONCURRENT",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An executable step of the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    #[serde(rename = "action_launch_method", alias = "execution_mode")]
    pub execution_mode: ExecutionMode,
    #[serde(rename = "action_goal", alias = "goal", default)]
    pub goal: String,
    #[serde(rename = "action_label", alias = "label", default)]
    pub label: String,
    /// Per-action plan file. Absent references are reported at compile time.
    #[serde(rename = "action_xml", alias = "plan_ref", default)]
    pub plan_ref: Option<PlanFileRef>,
}

/// A synchronisation point closing the actions listed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStep {
    #[serde(rename = "action_event", alias = "required_mode")]
    pub required_mode: ExecutionMode,
}

/// One entry of the plan, tagged by its `action_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type")]
pub enum PlanEntry {
    #[serde(rename = "ACTION", alias = "CO_SIM_ACTION", alias = "CO_SIM_ACTION_SCRIPT")]
    Action(ActionStep),
    #[serde(rename = "EVENT", alias = "CO_SIM_EVENT")]
    Event(EventStep),
    /// Any `action_type` the launcher does not know how to handle.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: StepId,
    #[serde(flatten)]
    pub entry: PlanEntry,
}

/// Native process invocation for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchArgs {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl LaunchArgs {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

/// The complete action plan plus its lookups. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanModel {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub launch_args: HashMap<StepId, LaunchArgs>,
    #[serde(default)]
    pub sci_params: HashMap<StepId, SciParamsRef>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl PlanModel {
    /// Load a plan that was already translated to JSON by the plan loader.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan file {}", path.display()))?;
        let plan: PlanModel = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse plan file {}", path.display()))?;
        Ok(plan)
    }

    pub fn action(&self, id: &str) -> Option<&ActionStep> {
        self.steps.iter().find_map(|step| match &step.entry {
            PlanEntry::Action(action) if step.id.as_str() == id => Some(action),
            _ => None,
        })
    }

    pub fn launch_args_for(&self, id: &str) -> Option<&LaunchArgs> {
        self.launch_args.get(id)
    }

    pub fn sci_params_for(&self, id: &str) -> Option<&SciParamsRef> {
        self.sci_params.get(id)
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    // Builder helpers used by loaders and tests.

    pub fn push_action(
        &mut self,
        id: impl Into<StepId>,
        mode: ExecutionMode,
        plan_ref: impl Into<PlanFileRef>,
    ) -> &mut Self {
        let id = id.into();
        self.steps.push(PlanStep {
            entry: PlanEntry::Action(ActionStep {
                execution_mode: mode,
                goal: format!("{id} goal"),
                label: id.to_string(),
                plan_ref: Some(plan_ref.into()),
            }),
            id,
        });
        self
    }

    pub fn push_event(&mut self, id: impl Into<StepId>, mode: ExecutionMode) -> &mut Self {
        self.steps.push(PlanStep {
            id: id.into(),
            entry: PlanEntry::Event(EventStep {
                required_mode: mode,
            }),
        });
        self
    }

    pub fn set_launch_args(&mut self, id: impl Into<StepId>, args: LaunchArgs) -> &mut Self {
        self.launch_args.insert(id.into(), args);
        self
    }

    pub fn set_sci_params(&mut self, id: impl Into<StepId>, path: impl Into<SciParamsRef>) -> &mut Self {
        self.sci_params.insert(id.into(), path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_with_loader_spellings() {
        let json = r#"{
            "steps": [
                {
                    "id": "action_002",
                    "action_type": "CO_SIM_ACTION",
                    "action_launch_method": "CO_SIM_SEQUENTIAL_ACTION",
                    "action_goal": "generate initial spikes",
                    "action_label": "spikes",
                    "action_xml": "initial_spikes_generator.xml"
                },
                {
                    "id": "action_004",
                    "action_type": "CO_SIM_EVENT",
                    "action_event": "CO_SIM_WAIT_FOR_SEQUENTIAL_ACTIONS"
                }
            ],
            "launch_args": {
                "action_002": { "program": "python3", "args": ["spikes.py"] }
            },
            "variables": { "CO_SIM_EXECUTION_ENVIRONMENT": "Local" }
        }"#;

        let plan: PlanModel = serde_json::from_str(json).unwrap();
        assert_eq!(plan.steps.len(), 2);

        let action = plan.action("action_002").unwrap();
        assert_eq!(action.execution_mode, ExecutionMode::Sequential);
        assert_eq!(action.goal, "generate initial spikes");
        assert_eq!(
            action.plan_ref.as_ref().map(|r| r.as_str()),
            Some("initial_spikes_generator.xml")
        );

        assert_eq!(
            plan.steps[1].entry,
            PlanEntry::Event(EventStep {
                required_mode: ExecutionMode::Sequential
            })
        );
        assert_eq!(plan.launch_args_for("action_002").unwrap().program, "python3");
        assert_eq!(plan.variable(EXECUTION_ENVIRONMENT_VAR), Some("Local"));
    }

    #[test]
    fn test_parse_short_spellings() {
        let json = r#"{
            "steps": [
                { "id": "a1", "action_type": "ACTION", "execution_mode": "CONCURRENT", "plan_ref": "a1.xml" },
                { "id": "e1", "action_type": "EVENT", "required_mode": "CONCURRENT" }
            ]
        }"#;

        let plan: PlanModel = serde_json::from_str(json).unwrap();
        let action = plan.action("a1").unwrap();
        assert_eq!(action.execution_mode, ExecutionMode::Concurrent);
        assert!(action.goal.is_empty());
    }

    #[test]
    fn test_unknown_action_type_is_kept() {
        let json = r#"{
            "steps": [
                { "id": "x1", "action_type": "CO_SIM_SOMETHING_ELSE", "foo": 1 }
            ]
        }"#;

        let plan: PlanModel = serde_json::from_str(json).unwrap();
        assert_eq!(plan.steps[0].entry, PlanEntry::Unrecognized);
        assert!(plan.action("x1").is_none());
    }

    #[test]
    fn test_events_are_not_actions() {
        let mut plan = PlanModel::default();
        plan.push_action("a1", ExecutionMode::Sequential, "a1.xml")
            .push_event("e1", ExecutionMode::Sequential);

        assert!(plan.action("a1").is_some());
        assert!(plan.action("e1").is_none());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ExecutionMode::Sequential.to_string(), "SEQUENTIAL");
        assert_eq!(ExecutionMode::Concurrent.to_string(), "CONCURRENT");
    }
}
