//! Contract with the batch launcher that carries out concurrent groups.
//!
//! A concurrent group is handed over as one [`BatchRequest`]. The launcher
//! decides where and how its actions run (local child processes, an HPC
//! allocation, ...) and reports a single aggregate [`LaunchResponse`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::LaunchArgs;
use crate::types::{PlanFileRef, SciParamsRef, StepId};

pub mod local;

pub use local::LocalBatchLauncher;

/// Environment variable carrying the serialized [`ExecutionContext`] into
/// each concurrently launched process.
pub const EXECUTION_CONTEXT_ENV: &str = "COSIM_EXECUTION_CONTEXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEnvironment {
    Local,
    Hpc,
}

impl ExecutionEnvironment {
    /// Anything other than `LOCAL` (case-insensitive) means a cluster run.
    pub fn from_variable(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("local") {
            ExecutionEnvironment::Local
        } else {
            ExecutionEnvironment::Hpc
        }
    }

    pub fn is_hpc(&self) -> bool {
        matches!(self, ExecutionEnvironment::Hpc)
    }
}

/// Settings the launcher is constructed with; passed through unchanged from
/// the plan and the launcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherSettings {
    pub log_settings: Value,
    pub execution_environment: ExecutionEnvironment,
    pub is_interactive: bool,
    pub is_monitoring_enabled: bool,
    pub is_app_server_enabled: bool,
    pub services_deployment: Value,
    pub communication_settings: Value,
}

/// Shared context a concurrent action needs when it runs outside the
/// launcher's process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub log_settings: Value,
    pub plan_ref: PlanFileRef,
    pub sci_params: SciParamsRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub action_id: StepId,
    pub goal: String,
    pub label: String,
    pub launch_args: LaunchArgs,
    pub context: ExecutionContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub event_id: StepId,
    pub settings: LauncherSettings,
    pub actions: Vec<LaunchRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchResponse {
    Ok,
    NotOk,
}

/// Carries out one batch of concurrent actions and waits for all of them.
///
/// No timeout is applied by the caller: a launcher that never returns keeps
/// the plan waiting.
#[async_trait]
pub trait BatchLauncher: Send + Sync {
    async fn launch(&self, request: BatchRequest) -> Result<LaunchResponse>;
}
