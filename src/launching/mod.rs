//! Carrying out an action plan: compile it into groups, then launch each
//! group sequentially on the worker pool or concurrently through the batch
//! launcher.

pub mod concurrent;
pub mod context;
pub mod sequential;


use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::LauncherConfig;
use crate::core::executor::ActionRunner;
use crate::core::scheduler::{CompletionRecord, WorkerPool};
use crate::launcher::BatchLauncher;
use crate::model::{ExecutionMode, PlanModel};
use crate::strategy;

pub use concurrent::ConcurrentRunner;
pub use context::RunContext;
pub use sequential::SequentialRunner;

/// Outcome of launching one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    Ok,
    NotOk,
}

/// Final outcome of [`PlanExecutor::carry_out_action_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LauncherReturnCode {
    LauncherOk,
    MappingOutError,
    ActionsGroupingError,
    GatheringXmlFilenamesError,
    PerformingStrategyError,
    ActionsFinishedWithError,
}

impl LauncherReturnCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LauncherOk => "LAUNCHER_OK",
            Self::MappingOutError => "MAPPING_OUT_ERROR",
            Self::ActionsGroupingError => "ACTIONS_GROUPING_ERROR",
            Self::GatheringXmlFilenamesError => "GATHERING_XML_FILENAMES_ERROR",
            Self::PerformingStrategyError => "PERFORMING_STRATEGY_ERROR",
            Self::ActionsFinishedWithError => "ACTIONS_FINISHED_WITH_ERROR",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::LauncherOk)
    }
}

impl fmt::Display for LauncherReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one action plan end to end.
pub struct PlanExecutor {
    plan: PlanModel,
    config: Arc<LauncherConfig>,
    runner: Arc<dyn ActionRunner>,
    launcher: Arc<dyn BatchLauncher>,
    ctx: Arc<RunContext>,
}

impl PlanExecutor {
    pub fn new(
        plan: PlanModel,
        config: Arc<LauncherConfig>,
        runner: Arc<dyn ActionRunner>,
        launcher: Arc<dyn BatchLauncher>,
    ) -> Self {
        let ctx = Arc::new(RunContext::from_plan(&plan));
        Self {
            plan,
            config,
            runner,
            launcher,
            ctx,
        }
    }

    /// Handle used to interrupt the run from outside.
    pub fn context(&self) -> Arc<RunContext> {
        self.ctx.clone()
    }

    pub async fn carry_out_action_plan(&self) -> LauncherReturnCode {
        let span = info_span!("plan_run", run_id = %self.ctx.run_id());
        self.carry_out().instrument(span).await
    }

    async fn carry_out(&self) -> LauncherReturnCode {
        info!(steps = self.plan.steps.len(), "carrying out the action plan");

        let strategy = match strategy::compile(&self.plan) {
            Ok(strategy) => strategy,
            Err(err) => {
                error!("action plan could not be mapped out: {err}");
                return LauncherReturnCode::MappingOutError;
            }
        };

        if let Err(err) = strategy::validate_grouping(&strategy, &self.plan) {
            error!("actions are not grouped correctly: {err}");
            return LauncherReturnCode::ActionsGroupingError;
        }

        let plan_refs = match strategy::gather_plan_refs(&strategy, &self.plan) {
            Ok(refs) => refs,
            Err(err) => {
                error!("plan file references could not be gathered: {err}");
                return LauncherReturnCode::GatheringXmlFilenamesError;
            }
        };

        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(
            strategy.max_sequential_len().max(1),
            self.runner.clone(),
            results_tx,
        );
        let mut sequential = SequentialRunner::new(pool);
        let concurrent = ConcurrentRunner::new(self.launcher.clone(), self.config.clone());

        for group in strategy.groups() {
            if self.ctx.is_stopped() || self.ctx.is_interrupted() {
                warn!(event = %group.event_id, "run was stopped, skipping remaining groups");
                return LauncherReturnCode::PerformingStrategyError;
            }

            debug!(
                event = %group.event_id,
                mode = %group.required_mode,
                actions = group.len(),
                "dispatching group"
            );

            let status = match group.required_mode {
                ExecutionMode::Sequential => {
                    sequential.run_group(group, &self.plan, &self.ctx).await
                }
                ExecutionMode::Concurrent => {
                    concurrent
                        .run_group(group, &self.plan, &plan_refs, &self.ctx)
                        .await
                }
            };

            if status == LaunchStatus::NotOk {
                error!(event = %group.event_id, "group could not be carried out");
                return LauncherReturnCode::PerformingStrategyError;
            }
        }

        // Every sender lives in the pool, which is idle once all groups ran.
        let mut records: Vec<CompletionRecord> = Vec::new();
        while let Ok(record) = results_rx.try_recv() {
            records.push(record);
        }

        let failed: Vec<&CompletionRecord> = records.iter().filter(|r| !r.is_ok()).collect();
        if failed.is_empty() {
            info!(completed = records.len(), "action plan carried out");
            LauncherReturnCode::LauncherOk
        } else {
            for record in &failed {
                error!(
                    action = %record.action_id,
                    return_code = record.return_code,
                    "action finished with error"
                );
            }
            LauncherReturnCode::ActionsFinishedWithError
        }
    }
}
