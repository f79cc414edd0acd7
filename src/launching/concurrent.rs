use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::LaunchStatus;
use super::context::RunContext;
use crate::config::LauncherConfig;
use crate::error::LaunchError;
use crate::launcher::{BatchLauncher, BatchRequest, ExecutionContext, LaunchRecord, LaunchResponse};
use crate::model::PlanModel;
use crate::strategy::Group;
use crate::types::{PlanFileRef, StepId};

/// Hands concurrent groups to the batch launcher as a single batch.
///
/// The stop flag is not consulted here: once a batch has been handed over,
/// the launcher owns it until it reports back.
pub struct ConcurrentRunner {
    launcher: Arc<dyn BatchLauncher>,
    config: Arc<LauncherConfig>,
}

impl ConcurrentRunner {
    pub fn new(launcher: Arc<dyn BatchLauncher>, config: Arc<LauncherConfig>) -> Self {
        Self { launcher, config }
    }

    pub async fn run_group(
        &self,
        group: &Group,
        plan: &PlanModel,
        plan_refs: &HashMap<StepId, PlanFileRef>,
        ctx: &RunContext,
    ) -> LaunchStatus {
        debug!(event = %group.event_id, "populating the list of concurrent actions to be performed");

        let actions = match self.assemble_batch(group, plan, plan_refs) {
            Ok(actions) => actions,
            Err(err) => {
                error!(event = %group.event_id, "{err}");
                return LaunchStatus::NotOk;
            }
        };

        if actions.is_empty() {
            debug!(event = %group.event_id, "no concurrent actions to perform");
            return LaunchStatus::Ok;
        }

        let request = BatchRequest {
            event_id: group.event_id.clone(),
            settings: ctx.launcher_settings(&self.config),
            actions,
        };

        info!(
            event = %group.event_id,
            actions = request.actions.len(),
            environment = ?request.settings.execution_environment,
            "performing concurrent actions"
        );

        match self.launcher.launch(request).await {
            Ok(LaunchResponse::Ok) => LaunchStatus::Ok,
            Ok(LaunchResponse::NotOk) => {
                error!(event = %group.event_id, "batch launcher reported failure");
                LaunchStatus::NotOk
            }
            Err(err) => {
                error!(event = %group.event_id, "batch launcher failed: {err:#}");
                LaunchStatus::NotOk
            }
        }
    }

    fn assemble_batch(
        &self,
        group: &Group,
        plan: &PlanModel,
        plan_refs: &HashMap<StepId, PlanFileRef>,
    ) -> Result<Vec<LaunchRecord>, LaunchError> {
        group
            .member_action_ids
            .iter()
            .map(|action_id| {
                let action = plan.action(action_id.as_str());
                let launch_args = plan
                    .launch_args_for(action_id.as_str())
                    .ok_or_else(|| LaunchError::MissingLaunchArgs(action_id.clone()))?;
                let sci_params = plan
                    .sci_params_for(action_id.as_str())
                    .ok_or_else(|| LaunchError::MissingSciParams(action_id.clone()))?;
                let plan_ref = plan_refs
                    .get(action_id)
                    .cloned()
                    .ok_or_else(|| LaunchError::MissingPlanRef(action_id.clone()))?;

                Ok(LaunchRecord {
                    action_id: action_id.clone(),
                    goal: action.map(|a| a.goal.clone()).unwrap_or_default(),
                    label: action.map(|a| a.label.clone()).unwrap_or_default(),
                    launch_args: launch_args.clone(),
                    context: ExecutionContext {
                        log_settings: self.config.log_settings.clone(),
                        plan_ref,
                        sci_params: sci_params.clone(),
                    },
                })
            })
            .collect()
    }
}
