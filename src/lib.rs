// Core modules
pub mod config;
pub mod error;
pub mod model;
pub mod strategy;
pub mod types;

// Launching
pub mod core;
pub mod launcher;
pub mod launching;

// App server
pub mod api;

// Re-export key types and functions
pub use config::LauncherConfig;
pub use error::{LaunchError, PlanError};
pub use model::{ExecutionMode, LaunchArgs, PlanModel};
pub use strategy::{Group, Strategy};
pub use types::{PlanFileRef, SciParamsRef, StepId};

pub use crate::core::{ActionRunner, CompletionRecord, ProcessRunner, WorkItem, WorkerPool};
pub use launcher::{BatchLauncher, BatchRequest, LaunchResponse, LocalBatchLauncher};
pub use launching::{LaunchStatus, LauncherReturnCode, PlanExecutor, RunContext};

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

/// Convenience function to build an executor for a plan file that runs every
/// action as a local process.
pub fn local_executor(plan_path: &Path, config: Arc<LauncherConfig>) -> Result<PlanExecutor> {
    let plan = PlanModel::from_json_file(plan_path)?;
    Ok(PlanExecutor::new(
        plan,
        config,
        Arc::new(ProcessRunner::new()),
        Arc::new(LocalBatchLauncher::new()),
    ))
}
