// Action execution engine

use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::scheduler::WorkItem;
use crate::model::LaunchArgs;

/// Return code recorded when an action could not be run at all, or was
/// terminated by a signal.
pub const ACTION_ABORTED: i32 = -1;

/// Executes the work items handed to sequential workers.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Called by each worker before it starts pulling from the queue. An
    /// error here makes the pool start-up fail.
    async fn prepare_worker(&self, _index: usize) -> Result<()> {
        Ok(())
    }

    /// Runs one action to completion and returns its exit code.
    async fn run(&self, item: &WorkItem) -> Result<i32>;
}

/// Runs each action as a native child process.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionRunner for ProcessRunner {
    async fn run(&self, item: &WorkItem) -> Result<i32> {
        let start = Instant::now();
        let mut cmd = build_command(&item.launch_args);

        info!(
            event = %item.event_id,
            action = %item.action_id,
            program = %item.launch_args.program,
            "spawning action"
        );

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn <{}>", item.action_id))?;
        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for <{}>", item.action_id))?;

        let code = match status.code() {
            Some(code) => code,
            None => {
                warn!(action = %item.action_id, "action terminated by signal");
                ACTION_ABORTED
            }
        };

        debug!(
            action = %item.action_id,
            code,
            elapsed = start.elapsed().as_secs_f64(),
            "action finished"
        );
        Ok(code)
    }
}

/// Builds the process invocation for an action. Output goes to the
/// launcher's own stdout/stderr.
pub fn build_command(args: &LaunchArgs) -> Command {
    let mut cmd = Command::new(&args.program);
    cmd.args(&args.args)
        .envs(args.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    if let Some(cwd) = &args.cwd {
        cmd.current_dir(cwd);
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepId;

    fn item(program: &str, args: &[&str]) -> WorkItem {
        WorkItem {
            event_id: StepId::new("e1"),
            action_id: StepId::new("a1"),
            launch_args: LaunchArgs::new(program, args.iter().copied()),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_reports_exit_code() {
        let runner = ProcessRunner::new();
        assert_eq!(runner.run(&item("sh", &["-c", "exit 0"])).await.unwrap(), 0);
        assert_eq!(runner.run(&item("sh", &["-c", "exit 3"])).await.unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_passes_env() {
        let mut work = item("sh", &["-c", "test \"$COSIM_TEST_VALUE\" = expected"]);
        work.launch_args
            .env
            .insert("COSIM_TEST_VALUE".into(), "expected".into());

        assert_eq!(ProcessRunner::new().run(&work).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let result = ProcessRunner::new()
            .run(&item("/nonexistent/cosim-action-binary", &[]))
            .await;
        assert!(result.is_err());
    }
}
