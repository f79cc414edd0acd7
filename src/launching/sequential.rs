use tracing::{error, info, warn};

use super::LaunchStatus;
use super::context::RunContext;
use crate::core::scheduler::{WorkItem, WorkerPool};
use crate::model::PlanModel;
use crate::strategy::Group;

/// Carries out sequential groups on a worker pool that lives for the whole
/// plan run.
pub struct SequentialRunner {
    pool: WorkerPool,
}

impl SequentialRunner {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Starts the pool, runs the members one at a time and stops the pool.
    ///
    /// The pool is stopped even when the group is abandoned, so work that
    /// was already submitted drains before this returns.
    pub async fn run_group(
        &mut self,
        group: &Group,
        plan: &PlanModel,
        ctx: &RunContext,
    ) -> LaunchStatus {
        info!(event = %group.event_id, "sequentially processing actions owned by the event");

        if let Err(err) = self.pool.start().await {
            error!(event = %group.event_id, "{err}");
            return LaunchStatus::NotOk;
        }

        let status = self.submit_in_order(group, plan, ctx).await;

        if let Err(err) = self.pool.stop().await {
            error!(event = %group.event_id, "workers could not be stopped: {err}");
            self.pool.abort();
            return LaunchStatus::NotOk;
        }

        status
    }

    async fn submit_in_order(
        &self,
        group: &Group,
        plan: &PlanModel,
        ctx: &RunContext,
    ) -> LaunchStatus {
        for action_id in &group.member_action_ids {
            // An interrupt racing the previous completion must not launch more work.
            if ctx.is_interrupted() {
                warn!(action = %action_id, "caught interrupt, setting stop flag");
                ctx.set_stop_flag();
                return LaunchStatus::NotOk;
            }

            let Some(launch_args) = plan.launch_args_for(action_id.as_str()) else {
                error!(action = %action_id, "there are no launch arguments to spawn the action");
                return LaunchStatus::NotOk;
            };

            let item = WorkItem {
                event_id: group.event_id.clone(),
                action_id: action_id.clone(),
                launch_args: launch_args.clone(),
            };
            if let Err(err) = self.pool.submit(item) {
                error!(action = %action_id, "{err}");
                return LaunchStatus::NotOk;
            }

            // Wait for this action before submitting the next one.
            tokio::select! {
                biased;
                _ = self.pool.join() => {}
                _ = ctx.interrupted() => {
                    warn!(action = %action_id, "caught interrupt, setting stop flag");
                    ctx.set_stop_flag();
                    return LaunchStatus::NotOk;
                }
            }
        }

        LaunchStatus::Ok
    }
}
