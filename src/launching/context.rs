//! Per-run state shared by every component of one plan execution.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::{LauncherConfig, strtobool};
use crate::launcher::{ExecutionEnvironment, LauncherSettings};
use crate::model::{
    ENABLE_APP_SERVER_PARAM, ENABLE_MONITORING_PARAM, EXECUTION_ENVIRONMENT_VAR, PlanModel,
};

/// Cancellation and feature flags for one plan run.
///
/// An *interrupt* is the request coming from outside (Ctrl-C, the app
/// server's stop endpoint). The *stop flag* is set by a runner once it has
/// observed the interrupt and abandoned its group; no group is dispatched
/// after either is set.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    stop: AtomicBool,
    interrupt: watch::Sender<bool>,
    is_monitoring_enabled: bool,
    is_app_server_enabled: bool,
    execution_environment: ExecutionEnvironment,
}

impl RunContext {
    pub fn new(
        is_monitoring_enabled: bool,
        is_app_server_enabled: bool,
        execution_environment: ExecutionEnvironment,
    ) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            run_id: Uuid::new_v4(),
            stop: AtomicBool::new(false),
            interrupt,
            is_monitoring_enabled,
            is_app_server_enabled,
            execution_environment,
        }
    }

    /// Derive the flags from the plan's parameters and variables. Invalid or
    /// missing flags fall back to disabled.
    pub fn from_plan(plan: &PlanModel) -> Self {
        let is_monitoring_enabled = plan_flag(plan, ENABLE_MONITORING_PARAM);
        debug!("is resource usage monitoring enabled: {is_monitoring_enabled}");

        let is_app_server_enabled = plan_flag(plan, ENABLE_APP_SERVER_PARAM);
        debug!("is app server enabled: {is_app_server_enabled}");

        let execution_environment = match plan.variable(EXECUTION_ENVIRONMENT_VAR) {
            Some(value) => ExecutionEnvironment::from_variable(value),
            None => {
                debug!("{EXECUTION_ENVIRONMENT_VAR} is not set, assuming a local run");
                ExecutionEnvironment::Local
            }
        };

        Self::new(is_monitoring_enabled, is_app_server_enabled, execution_environment)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_monitoring_enabled(&self) -> bool {
        self.is_monitoring_enabled
    }

    pub fn is_app_server_enabled(&self) -> bool {
        self.is_app_server_enabled
    }

    pub fn execution_environment(&self) -> ExecutionEnvironment {
        self.execution_environment
    }

    /// Ask the run to stop launching further work.
    pub fn interrupt(&self) {
        self.interrupt.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupt.borrow()
    }

    /// Resolves once [`interrupt`](Self::interrupt) has been called.
    pub async fn interrupted(&self) {
        let mut rx = self.interrupt.subscribe();
        let _ = rx.wait_for(|interrupted| *interrupted).await;
    }

    pub fn set_stop_flag(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Settings handed to the batch launcher for a concurrent group.
    pub fn launcher_settings(&self, config: &LauncherConfig) -> LauncherSettings {
        LauncherSettings {
            log_settings: config.log_settings.clone(),
            execution_environment: self.execution_environment,
            is_interactive: config.is_interactive,
            is_monitoring_enabled: self.is_monitoring_enabled,
            is_app_server_enabled: self.is_app_server_enabled,
            services_deployment: config.services_deployment.clone(),
            communication_settings: config.communication_settings.clone(),
        }
    }
}

fn plan_flag(plan: &PlanModel, name: &str) -> bool {
    let parsed = plan
        .parameter(name)
        .ok_or_else(|| anyhow::anyhow!("{name} is not set"))
        .and_then(strtobool);

    match parsed {
        Ok(flag) => flag,
        Err(err) => {
            error!("{name} could not be set from the plan: {err}");
            error!("falling back to default settings");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flags_from_plan() {
        let mut plan = PlanModel::default();
        plan.parameters.insert(ENABLE_MONITORING_PARAM.into(), "yes".into());
        plan.parameters.insert(ENABLE_APP_SERVER_PARAM.into(), "bogus".into());
        plan.variables.insert(EXECUTION_ENVIRONMENT_VAR.into(), "hpc".into());

        let ctx = RunContext::from_plan(&plan);
        assert!(ctx.is_monitoring_enabled());
        assert!(!ctx.is_app_server_enabled());
        assert_eq!(ctx.execution_environment(), ExecutionEnvironment::Hpc);
    }

    #[test]
    fn test_defaults_for_empty_plan() {
        let ctx = RunContext::from_plan(&PlanModel::default());
        assert!(!ctx.is_monitoring_enabled());
        assert!(!ctx.is_app_server_enabled());
        assert_eq!(ctx.execution_environment(), ExecutionEnvironment::Local);
        assert!(!ctx.is_interrupted());
        assert!(!ctx.is_stopped());
    }

    #[tokio::test]
    async fn test_interrupted_resolves_after_interrupt() {
        let ctx = std::sync::Arc::new(RunContext::from_plan(&PlanModel::default()));

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.interrupted().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        ctx.interrupt();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("interrupted() should resolve")
            .unwrap();
        assert!(ctx.is_interrupted());
        // the stop flag is only set by a runner observing the interrupt
        assert!(!ctx.is_stopped());
    }

    #[test]
    fn test_launcher_settings_pass_config_through() {
        let config = LauncherConfig {
            log_settings: serde_json::json!({"level": "INFO"}),
            is_interactive: true,
            ..Default::default()
        };
        let ctx = RunContext::new(true, false, ExecutionEnvironment::Local);

        let settings = ctx.launcher_settings(&config);
        assert_eq!(settings.log_settings, config.log_settings);
        assert!(settings.is_interactive);
        assert!(settings.is_monitoring_enabled);
        assert!(!settings.is_app_server_enabled);
    }
}
