use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{BatchLauncher, BatchRequest, EXECUTION_CONTEXT_ENV, LaunchResponse};
use crate::core::executor::build_command;

/// Runs every action of a batch as a child process of this launcher and
/// waits for all of them.
///
/// The batch is `OK` only if every process could be spawned and exited with
/// code 0. Cluster placement is not supported; an HPC batch is run locally.
#[derive(Debug, Default, Clone)]
pub struct LocalBatchLauncher;

impl LocalBatchLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchLauncher for LocalBatchLauncher {
    async fn launch(&self, request: BatchRequest) -> Result<LaunchResponse> {
        if request.settings.execution_environment.is_hpc() {
            warn!(event = %request.event_id, "HPC execution environment requested; running the batch locally");
        }

        let mut failed = false;
        let mut running = JoinSet::new();

        for record in request.actions {
            let context = serde_json::to_string(&record.context)?;
            let mut cmd = build_command(&record.launch_args);
            cmd.env(EXECUTION_CONTEXT_ENV, context);

            match cmd.spawn() {
                Ok(mut child) => {
                    info!(action = %record.action_id, label = %record.label, "spawned concurrent action");
                    let action_id = record.action_id;
                    running.spawn(async move { (action_id, child.wait().await) });
                }
                Err(err) => {
                    error!(action = %record.action_id, %err, "concurrent action could not be spawned");
                    failed = true;
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((action_id, Ok(status))) if status.success() => {
                    debug!(action = %action_id, "concurrent action finished");
                }
                Ok((action_id, Ok(status))) => {
                    error!(action = %action_id, code = ?status.code(), "concurrent action finished with error");
                    failed = true;
                }
                Ok((action_id, Err(err))) => {
                    error!(action = %action_id, %err, "failed to wait for concurrent action");
                    failed = true;
                }
                Err(err) => {
                    error!(%err, "concurrent action monitor panicked");
                    failed = true;
                }
            }
        }

        Ok(if failed {
            LaunchResponse::NotOk
        } else {
            LaunchResponse::Ok
        })
    }
}
